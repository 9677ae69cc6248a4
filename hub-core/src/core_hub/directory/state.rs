//! Directory state snapshot

use crate::core_hub::hub::Hub;
use crate::core_hub::invitation::HubInvitation;
use crate::core_hub::member::{HubMember, HubRole};
use crate::core_hub::types::{HubId, UserId};
use std::collections::HashMap;

/// Cached copy of the identity's hubs, the current hub's members and
/// invitations, and the identity's received invitations
#[derive(Debug, Clone, Default)]
pub struct DirectoryState {
    /// Identity the cache belongs to
    pub user_id: Option<UserId>,

    /// Hubs the identity belongs to, newest first
    pub user_hubs: Vec<Hub>,

    /// The identity's role in each of `user_hubs`
    pub hub_roles: HashMap<HubId, HubRole>,

    pub current_hub: Option<Hub>,

    /// Members of `current_hub`
    pub hub_members: Vec<HubMember>,

    /// Unaccepted invitations of `current_hub`
    pub pending_invites: Vec<HubInvitation>,

    /// Unaccepted invitations addressed to the identity
    pub user_invitations: Vec<HubInvitation>,

    pub is_loading: bool,

    pub is_initialized: bool,

    /// Last error, if any
    pub error: Option<String>,
}

impl DirectoryState {
    pub fn current_hub_id(&self) -> Option<&HubId> {
        self.current_hub.as_ref().map(|h| &h.id)
    }

    pub fn is_current(&self, hub_id: &HubId) -> bool {
        self.current_hub_id() == Some(hub_id)
    }

    pub(super) fn clear_hub_data(&mut self) {
        self.hub_members.clear();
        self.pending_invites.clear();
    }
}
