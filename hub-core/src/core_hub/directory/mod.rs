//! Hub Directory Store
//!
//! Loads and caches the identity's hubs, the current hub's members and
//! pending invitations, and the invitations the identity has received.
//! Every action goes to the gateway first and then refreshes the cache from
//! the backend, which stays authoritative.
//!
//! ## Layout
//!
//! - `state`: the cached snapshot
//! - `hub_actions`: initialize, reload, switch, create/update/leave/delete
//! - `member_actions`: member list, invitations sent from the current hub
//! - `invitation_actions`: invitations received by the identity
//! - `selectors`: pure derivations (roles, permissions, active invites)
//!
//! ## Ordering
//!
//! Each hub selection takes a new generation number. A member/invitation load
//! that completes after a newer selection was issued is discarded, so the most
//! recently issued selection always wins.

mod hub_actions;
mod invitation_actions;
mod member_actions;
pub mod selectors;
mod state;

pub use state::DirectoryState;

use super::cache::HubSelection;
use super::error::HubResult;
use super::gateway::RemoteGateway;
use super::invitation::HubInvitation;
use super::member::HubMember;
use super::permissions::HubPermissions;
use super::session::SessionStore;
use super::types::{HubId, Timestamp};
use crate::config::InvitationConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

pub struct HubDirectory {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionStore>,
    /// Persisted current-hub id, injected per session
    selection: HubSelection,
    invitation_ttl: Duration,
    state: RwLock<DirectoryState>,
    generation: AtomicU64,
    /// Bumped by `reset`; loads started under an older epoch are discarded
    epoch: AtomicU64,
    current_hub: watch::Sender<Option<HubId>>,
}

impl HubDirectory {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SessionStore>,
        selection: HubSelection,
        invitations: &InvitationConfig,
    ) -> Self {
        let (current_hub, _) = watch::channel(None);
        Self {
            gateway,
            session,
            selection,
            invitation_ttl: invitations.ttl,
            state: RwLock::new(DirectoryState::default()),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            current_hub,
        }
    }

    /// Snapshot of the cached state
    pub async fn state(&self) -> DirectoryState {
        self.state.read().await.clone()
    }

    /// Receiver that follows the current hub id
    pub fn subscribe_current_hub(&self) -> watch::Receiver<Option<HubId>> {
        self.current_hub.subscribe()
    }

    /// Capability flags for the identity in `hub_id`, or in the current hub
    pub async fn hub_permissions(&self, hub_id: Option<&HubId>) -> HubPermissions {
        selectors::permissions(&*self.state.read().await, hub_id)
    }

    pub async fn clear_error(&self) {
        self.state.write().await.error = None;
    }

    /// Mark the directory busy and return the session epoch the action runs under
    async fn begin(&self) -> u64 {
        let mut state = self.state.write().await;
        state.is_loading = true;
        state.error = None;
        self.current_epoch()
    }

    /// Clear the loading flag and record the error, whatever the outcome.
    /// An action that outlived a `reset` leaves the state alone.
    async fn finish<T>(
        &self,
        action: &'static str,
        epoch: u64,
        result: HubResult<T>,
    ) -> HubResult<T> {
        let mut state = self.state.write().await;
        if !self.is_same_session(epoch) {
            debug!(action, "Discarding result of an action from a previous session");
            return result;
        }
        state.is_loading = false;
        if let Err(e) = &result {
            warn!(action, error = %e, "Hub directory action failed");
            state.error = Some(e.to_string());
        }
        result
    }

    fn next_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_same_session(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_latest(&self, generation: u64) -> bool {
        self.current_generation() == generation
    }

    /// Members and unaccepted invitations of a hub, with expiry marked
    async fn fetch_hub_data(
        &self,
        hub_id: &HubId,
    ) -> HubResult<(Vec<HubMember>, Vec<HubInvitation>)> {
        let members = self.gateway.list_members(hub_id).await?;
        let now = Timestamp::now();
        let invitations = self
            .gateway
            .list_hub_invitations(hub_id)
            .await?
            .into_iter()
            .map(|i| i.with_expiry(now))
            .collect();
        Ok((members, invitations))
    }

    fn publish_current(&self, hub_id: Option<&HubId>) {
        self.current_hub.send_if_modified(|current| {
            if current.as_ref() == hub_id {
                false
            } else {
                *current = hub_id.cloned();
                true
            }
        });
    }
}
