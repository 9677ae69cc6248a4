//! Hub-level actions: loading the directory, switching, and hub CRUD

use super::{selectors, DirectoryState, HubDirectory};
use crate::core_hub::error::{HubError, HubResult};
use crate::core_hub::hub::{validate_hub_name, Hub, HubPatch, NewHub};
use crate::core_hub::session::Identity;
use crate::core_hub::types::HubId;
use tracing::{debug, info, warn};

impl HubDirectory {
    /// Load hubs, the selected hub's members and invitations, and the
    /// identity's received invitations.
    ///
    /// Never fails: errors land in `error` and the directory is marked
    /// initialized regardless.
    pub async fn initialize(&self) {
        let epoch = self.begin().await;
        let result = match self.session.require_identity() {
            Ok(identity) => self.load_directory(&identity, epoch).await,
            Err(e) => Err(e),
        };
        let result = self.finish("initialize", epoch, result).await;

        let mut state = self.state.write().await;
        if !self.is_same_session(epoch) {
            return;
        }
        state.is_initialized = true;
        if result.is_ok() {
            info!(
                hubs = state.user_hubs.len(),
                current_hub = ?state.current_hub_id(),
                "Hub directory initialized"
            );
        }
    }

    /// Full reload of hubs, membership and invitations
    pub async fn reload(&self) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = match self.session.require_identity() {
            Ok(identity) => self.load_directory(&identity, epoch).await,
            Err(e) => Err(e),
        };
        self.finish("reload", epoch, result).await
    }

    /// Make `hub_id` the current hub. The hub must already be loaded.
    pub async fn switch_hub(&self, hub_id: &HubId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_switch_hub(hub_id).await;
        self.finish("switch_hub", epoch, result).await
    }

    pub async fn create_hub(&self, new_hub: NewHub) -> HubResult<Hub> {
        let epoch = self.begin().await;
        let result = self.try_create_hub(new_hub, epoch).await;
        self.finish("create_hub", epoch, result).await
    }

    pub async fn update_hub(&self, hub_id: &HubId, patch: HubPatch) -> HubResult<Hub> {
        let epoch = self.begin().await;
        let result = self.try_update_hub(hub_id, patch).await;
        self.finish("update_hub", epoch, result).await
    }

    /// Drop the identity's own membership of `hub_id`
    pub async fn leave_hub(&self, hub_id: &HubId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_leave_hub(hub_id, epoch).await;
        self.finish("leave_hub", epoch, result).await
    }

    pub async fn delete_hub(&self, hub_id: &HubId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_delete_hub(hub_id, epoch).await;
        self.finish("delete_hub", epoch, result).await
    }

    /// Forget everything cached for the session, including the persisted
    /// current-hub id
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        self.next_epoch();
        self.next_generation();
        *state = DirectoryState::default();
        self.selection.clear();
        self.publish_current(None);
        debug!("Hub directory reset");
    }

    /// Load everything for `identity`. Nothing is written once `epoch` is
    /// no longer the session epoch.
    pub(super) async fn load_directory(&self, identity: &Identity, epoch: u64) -> HubResult<()> {
        let memberships = self.gateway.list_user_hubs(&identity.id).await?;

        let cached = self.selection.load();
        let selected = cached
            .as_ref()
            .and_then(|id| memberships.iter().find(|m| &m.hub.id == id))
            .or_else(|| memberships.first())
            .map(|m| m.hub.clone());

        let generation = self.next_generation();
        let hub_data = match &selected {
            Some(hub) => Some(self.fetch_hub_data(&hub.id).await?),
            None => None,
        };

        {
            let mut state = self.state.write().await;
            if !self.is_same_session(epoch) {
                debug!(
                    user_id = %identity.id,
                    "Discarding directory load from a previous session"
                );
                return Ok(());
            }
            state.user_id = Some(identity.id.clone());
            state.user_hubs = memberships.iter().map(|m| m.hub.clone()).collect();
            state.hub_roles = memberships
                .iter()
                .map(|m| (m.hub.id.clone(), m.role))
                .collect();

            if self.is_latest(generation) {
                state.current_hub = selected.clone();
                match hub_data {
                    Some((members, invites)) => {
                        state.hub_members = members;
                        state.pending_invites = invites;
                    }
                    None => state.clear_hub_data(),
                }
                match &selected {
                    Some(hub) => self.selection.store(&hub.id),
                    None => self.selection.clear(),
                }
                self.publish_current(selected.as_ref().map(|h| &h.id));
            } else {
                debug!("Discarding stale current-hub load");
            }
        }

        self.load_user_invitations(identity, epoch).await?;
        Ok(())
    }

    async fn try_switch_hub(&self, hub_id: &HubId) -> HubResult<()> {
        let hub = {
            let state = self.state.read().await;
            selectors::hub_by_id(&state, hub_id).cloned()
        }
        .ok_or_else(|| HubError::HubNotFound(hub_id.to_string()))?;

        let generation = self.next_generation();
        let (members, invites) = self.fetch_hub_data(&hub.id).await?;

        {
            let mut state = self.state.write().await;
            if !self.is_latest(generation) {
                debug!(hub_id = %hub.id, "Discarding stale hub switch");
                return Ok(());
            }
            state.current_hub = Some(hub.clone());
            state.hub_members = members;
            state.pending_invites = invites;
            self.selection.store(&hub.id);
            self.publish_current(Some(&hub.id));
        }

        info!(hub_id = %hub.id, name = %hub.name, "Switched current hub");
        Ok(())
    }

    async fn try_create_hub(&self, new_hub: NewHub, epoch: u64) -> HubResult<Hub> {
        validate_hub_name(&new_hub.name).map_err(HubError::Validation)?;
        let identity = self.session.require_identity()?;

        let hub = self.gateway.insert_hub(&new_hub).await?;
        info!(hub_id = %hub.id, name = %hub.name, user_id = %identity.id, "Hub created");

        // A new hub becomes current. Reload rather than patch so the owner
        // membership written by the backend shows up locally. The hub exists
        // either way, so a failed reload is recorded, not returned.
        if self.is_same_session(epoch) {
            self.selection.store(&hub.id);
        }
        if let Err(e) = self.load_directory(&identity, epoch).await {
            warn!(hub_id = %hub.id, error = %e, "Reload after hub creation failed");
            let mut state = self.state.write().await;
            if self.is_same_session(epoch) {
                state.error = Some(e.to_string());
            }
        }
        Ok(hub)
    }

    async fn try_update_hub(&self, hub_id: &HubId, patch: HubPatch) -> HubResult<Hub> {
        self.session.require_identity()?;
        if let Some(name) = &patch.name {
            validate_hub_name(name).map_err(HubError::Validation)?;
        }

        let hub = self.gateway.update_hub(hub_id, &patch).await?;

        let mut state = self.state.write().await;
        if let Some(cached) = state.user_hubs.iter_mut().find(|h| &h.id == hub_id) {
            *cached = hub.clone();
        }
        if let Some(current) = state.current_hub.as_mut().filter(|h| &h.id == hub_id) {
            *current = hub.clone();
        }
        info!(hub_id = %hub_id, "Hub updated");
        Ok(hub)
    }

    async fn try_leave_hub(&self, hub_id: &HubId, epoch: u64) -> HubResult<()> {
        let identity = self.session.require_identity()?;
        self.gateway.delete_membership(hub_id, &identity.id).await?;
        info!(hub_id = %hub_id, user_id = %identity.id, "Left hub");
        self.load_directory(&identity, epoch).await
    }

    async fn try_delete_hub(&self, hub_id: &HubId, epoch: u64) -> HubResult<()> {
        let identity = self.session.require_identity()?;
        self.gateway.delete_hub(hub_id).await?;
        info!(hub_id = %hub_id, "Hub deleted");
        self.load_directory(&identity, epoch).await
    }
}
