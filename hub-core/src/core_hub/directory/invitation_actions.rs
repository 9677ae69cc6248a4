//! Invitations received by the signed-in identity

use super::HubDirectory;
use crate::core_hub::error::{HubError, HubResult};
use crate::core_hub::gateway::{Procedure, ProcedureArgs};
use crate::core_hub::invitation::HubInvitation;
use crate::core_hub::session::Identity;
use crate::core_hub::types::{HubId, InvitationId, Timestamp};
use tracing::{debug, info};

impl HubDirectory {
    /// Load unaccepted invitations addressed to the identity, newest first,
    /// with `is_expired` computed locally
    pub async fn fetch_user_invitations(&self) -> HubResult<Vec<HubInvitation>> {
        let epoch = self.begin().await;
        let result = match self.session.require_identity() {
            Ok(identity) => self.load_user_invitations(&identity, epoch).await,
            Err(e) => Err(e),
        };
        self.finish("fetch_user_invitations", epoch, result).await
    }

    /// Join the invitation's hub. Membership insert and invitation removal
    /// run as one backend procedure.
    pub async fn accept_invitation(&self, invitation_id: &InvitationId) -> HubResult<HubId> {
        let epoch = self.begin().await;
        let result = self.try_accept_invitation(invitation_id, epoch).await;
        self.finish("accept_invitation", epoch, result).await
    }

    /// Turn the invitation down. Never creates a membership.
    pub async fn decline_invitation(&self, invitation_id: &InvitationId) -> HubResult<()> {
        let epoch = self.begin().await;
        let result = self.try_decline_invitation(invitation_id, epoch).await;
        self.finish("decline_invitation", epoch, result).await
    }

    pub(super) async fn load_user_invitations(
        &self,
        identity: &Identity,
        epoch: u64,
    ) -> HubResult<Vec<HubInvitation>> {
        let now = Timestamp::now();
        let mut invitations: Vec<HubInvitation> = self
            .gateway
            .list_received_invitations(&identity.id, &identity.email)
            .await?
            .into_iter()
            .map(|i| i.with_expiry(now))
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut state = self.state.write().await;
        if self.is_same_session(epoch) {
            state.user_invitations = invitations.clone();
        } else {
            debug!(user_id = %identity.id, "Discarding invitations from a previous session");
        }
        Ok(invitations)
    }

    async fn received_invitation(&self, invitation_id: &InvitationId) -> HubResult<HubInvitation> {
        self.state
            .read()
            .await
            .user_invitations
            .iter()
            .find(|i| &i.id == invitation_id)
            .cloned()
            .ok_or_else(|| HubError::InvitationNotFound(invitation_id.to_string()))
    }

    async fn try_accept_invitation(
        &self,
        invitation_id: &InvitationId,
        epoch: u64,
    ) -> HubResult<HubId> {
        let identity = self.session.require_identity()?;
        let invitation = self.received_invitation(invitation_id).await?;
        if invitation.expired_at(Timestamp::now()) {
            return Err(HubError::InvitationExpired);
        }

        let args = ProcedureArgs {
            invitation_id: invitation_id.clone(),
            user_id: identity.id.clone(),
        };
        let outcome = self
            .gateway
            .call_procedure(Procedure::AcceptHubInvitation, &args)
            .await?;
        if !outcome.success {
            return Err(HubError::Remote(
                outcome
                    .error
                    .unwrap_or_else(|| "Failed to accept invitation".to_string()),
            ));
        }
        info!(
            invitation_id = %invitation_id,
            hub_id = %invitation.hub_id,
            role = %invitation.role,
            "Invitation accepted"
        );

        self.load_user_invitations(&identity, epoch).await?;
        self.load_directory(&identity, epoch).await?;
        Ok(invitation.hub_id)
    }

    async fn try_decline_invitation(
        &self,
        invitation_id: &InvitationId,
        epoch: u64,
    ) -> HubResult<()> {
        let identity = self.session.require_identity()?;
        self.received_invitation(invitation_id).await?;

        let args = ProcedureArgs {
            invitation_id: invitation_id.clone(),
            user_id: identity.id.clone(),
        };
        let outcome = self
            .gateway
            .call_procedure(Procedure::DeclineHubInvitation, &args)
            .await?;
        if !outcome.success {
            return Err(HubError::Remote(
                outcome
                    .error
                    .unwrap_or_else(|| "Failed to decline invitation".to_string()),
            ));
        }
        info!(invitation_id = %invitation_id, "Invitation declined");

        self.load_user_invitations(&identity, epoch).await?;
        Ok(())
    }
}
