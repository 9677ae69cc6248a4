//! Session store: holds the authenticated identity and gates the directory

use super::error::{HubError, HubResult};
use super::gateway::RemoteGateway;
use super::types::{Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
}

/// Row of `user_profiles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: Timestamp,
}

impl From<&UserProfile> for Identity {
    fn from(profile: &UserProfile) -> Self {
        Identity {
            id: profile.id.clone(),
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::SignedIn(identity) => Some(identity),
            SessionState::SignedOut => None,
        }
    }
}

/// Session store
pub struct SessionStore {
    gateway: Arc<dyn RemoteGateway>,
    state: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        let (state, _) = watch::channel(SessionState::SignedOut);
        Self { gateway, state }
    }

    /// Resolve the identity the gateway is authenticated as.
    ///
    /// The profile row, when present, supplies the display name.
    pub async fn restore(&self) -> HubResult<Option<Identity>> {
        let user = self.gateway.current_user().await?;
        let Some(mut identity) = user else {
            debug!("No authenticated user");
            self.state.send_replace(SessionState::SignedOut);
            return Ok(None);
        };

        match self.gateway.fetch_profile(&identity.id).await {
            Ok(Some(profile)) => {
                identity.display_name = profile.display_name.or(identity.display_name);
            }
            Ok(None) => debug!(user_id = %identity.id, "No profile row for user"),
            Err(e) => warn!(user_id = %identity.id, error = %e, "Failed to load profile"),
        }

        info!(user_id = %identity.id, "Session restored");
        self.state.send_replace(SessionState::SignedIn(identity.clone()));
        Ok(Some(identity))
    }

    /// Sign out of the gateway. Local state is cleared even if the
    /// gateway call fails.
    pub async fn sign_out(&self) -> HubResult<()> {
        let result = self.gateway.sign_out().await.map_err(HubError::from);
        self.state.send_replace(SessionState::SignedOut);
        info!("Session signed out");
        result
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity().cloned()
    }

    /// Resolved identity, or `NotAuthenticated`
    pub fn require_identity(&self) -> HubResult<Identity> {
        self.identity().ok_or(HubError::NotAuthenticated)
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity().is_some()
    }

    /// Receiver that observes sign-in and sign-out transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}
