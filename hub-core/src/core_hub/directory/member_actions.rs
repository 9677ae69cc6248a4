//! Member management and invitations sent from a hub

use super::HubDirectory;
use crate::core_hub::error::{HubError, HubResult};
use crate::core_hub::invitation::{HubInvitation, InviteRequest, NewInvitation};
use crate::core_hub::member::{HubMember, HubRole};
use crate::core_hub::types::{is_valid_email, normalize_email, HubId, InvitationId, MemberId, Timestamp};
use tracing::{debug, info, warn};

impl HubDirectory {
    /// Re-fetch members and invitations of `hub_id` if it is still the
    /// current hub. Used by the realtime bridge; does not touch the loading
    /// flag or the error field.
    pub async fn refresh_hub(&self, hub_id: &HubId) -> HubResult<()> {
        let generation = self.current_generation();
        if !self.state.read().await.is_current(hub_id) {
            debug!(hub_id = %hub_id, "Skipping refresh of non-current hub");
            return Ok(());
        }

        let (members, invites) = match self.fetch_hub_data(hub_id).await {
            Ok(data) => data,
            Err(e) => {
                warn!(hub_id = %hub_id, error = %e, "Hub refresh failed");
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if self.is_latest(generation) && state.is_current(hub_id) {
            state.hub_members = members;
            state.pending_invites = invites;
            debug!(hub_id = %hub_id, members = state.hub_members.len(), "Hub refreshed");
        }
        Ok(())
    }

    /// Invite an email address to `hub_id`.
    ///
    /// When `hub_id` is the current hub, existing members and open
    /// invitations are checked locally before any network call.
    pub async fn invite_member(
        &self,
        hub_id: &HubId,
        request: InviteRequest,
    ) -> HubResult<HubInvitation> {
        let epoch = self.begin().await;
        let result = self.try_invite_member(hub_id, request).await;
        self.finish("invite_member", epoch, result).await
    }

    pub async fn remove_member(&self, member_id: &MemberId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_remove_member(member_id).await;
        self.finish("remove_member", epoch, result).await
    }

    /// Change a member's role. Only owners may do this; the backend enforces it.
    pub async fn update_member_role(
        &self,
        member_id: &MemberId,
        role: HubRole,
    ) -> HubResult<HubMember> {
        let epoch = self.begin().await;
        let result = self.try_update_member_role(member_id, role).await;
        self.finish("update_member_role", epoch, result).await
    }

    /// Withdraw a pending invitation before it is answered
    pub async fn cancel_invitation(&self, invitation_id: &InvitationId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_cancel_invitation(invitation_id).await;
        self.finish("cancel_invitation", epoch, result).await
    }

    async fn refresh_current(&self) -> HubResult<()> {
        let current = self.state.read().await.current_hub_id().cloned();
        match current {
            Some(hub_id) => self.refresh_hub(&hub_id).await,
            None => Ok(()),
        }
    }

    async fn try_invite_member(
        &self,
        hub_id: &HubId,
        request: InviteRequest,
    ) -> HubResult<HubInvitation> {
        let identity = self.session.require_identity()?;

        let email = normalize_email(&request.email);
        if !is_valid_email(&email) {
            return Err(HubError::Validation(format!(
                "Invalid email address: {}",
                request.email
            )));
        }
        if !request.role.is_grantable() {
            return Err(HubError::Validation(
                "Invitations can only grant the manager or member role".to_string(),
            ));
        }

        let now = Timestamp::now();
        {
            let state = self.state.read().await;
            if state.is_current(hub_id) {
                if state.hub_members.iter().any(|m| m.email == email) {
                    return Err(HubError::AlreadyMember(email));
                }
                if state.pending_invites.iter().any(|i| i.is_open_for(&email, now)) {
                    return Err(HubError::DuplicateInvitation(email));
                }
            }
        }

        let new_invitation = NewInvitation {
            hub_id: hub_id.clone(),
            email,
            role: request.role,
            invited_by: identity.id.clone(),
            expires_at: now.after(self.invitation_ttl),
        };
        let invitation = self.gateway.insert_invitation(&new_invitation).await?;
        info!(
            hub_id = %hub_id,
            invitation_id = %invitation.id,
            role = %invitation.role,
            "Invitation created"
        );

        if self.state.read().await.is_current(hub_id) {
            self.refresh_hub(hub_id).await?;
        }
        Ok(invitation.with_expiry(Timestamp::now()))
    }

    async fn try_remove_member(&self, member_id: &MemberId) -> HubResult<()> {
        self.session.require_identity()?;
        self.gateway
            .delete_member(member_id)
            .await
            .map_err(|e| e.with_missing(HubError::MemberNotFound(member_id.to_string())))?;

        self.state
            .write()
            .await
            .hub_members
            .retain(|m| &m.id != member_id);
        info!(member_id = %member_id, "Member removed");

        self.refresh_current().await
    }

    async fn try_update_member_role(
        &self,
        member_id: &MemberId,
        role: HubRole,
    ) -> HubResult<HubMember> {
        self.session.require_identity()?;
        if !role.is_grantable() {
            return Err(HubError::Validation(
                "Ownership cannot be granted through a role change".to_string(),
            ));
        }

        let member = self
            .gateway
            .update_member_role(member_id, role)
            .await
            .map_err(|e| e.with_missing(HubError::MemberNotFound(member_id.to_string())))?;

        let mut state = self.state.write().await;
        if let Some(cached) = state.hub_members.iter_mut().find(|m| &m.id == member_id) {
            cached.role = member.role;
        }
        info!(member_id = %member_id, role = %member.role, "Member role updated");
        Ok(member)
    }

    async fn try_cancel_invitation(&self, invitation_id: &InvitationId) -> HubResult<()> {
        self.session.require_identity()?;
        self.gateway
            .delete_invitation(invitation_id)
            .await
            .map_err(|e| {
                e.with_missing(HubError::InvitationNotFound(invitation_id.to_string()))
            })?;

        self.state
            .write()
            .await
            .pending_invites
            .retain(|i| &i.id != invitation_id);
        info!(invitation_id = %invitation_id, "Invitation cancelled");
        Ok(())
    }
}
