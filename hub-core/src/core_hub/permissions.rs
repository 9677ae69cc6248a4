//! Role to capability mapping

use super::member::HubRole;
use serde::{Deserialize, Serialize};

/// Capability flags derived from a caller's role in a hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubPermissions {
    pub can_manage_hub: bool,
    pub can_manage_members: bool,
    pub can_invite_members: bool,
    pub can_remove_members: bool,
    pub can_update_roles: bool,
    pub can_delete_hub: bool,
}

impl HubPermissions {
    /// Permissions for a caller holding `role`, or none at all.
    pub fn for_role(role: Option<HubRole>) -> Self {
        match role {
            Some(HubRole::Owner) => Self {
                can_manage_hub: true,
                can_manage_members: true,
                can_invite_members: true,
                can_remove_members: true,
                can_update_roles: true,
                can_delete_hub: true,
            },
            Some(HubRole::Manager) => Self {
                can_manage_hub: true,
                can_manage_members: true,
                can_invite_members: true,
                can_remove_members: true,
                can_update_roles: false,
                can_delete_hub: false,
            },
            Some(HubRole::Member) | None => Self::default(),
        }
    }

    fn flags(&self) -> [bool; 6] {
        [
            self.can_manage_hub,
            self.can_manage_members,
            self.can_invite_members,
            self.can_remove_members,
            self.can_update_roles,
            self.can_delete_hub,
        ]
    }

    pub fn all(&self) -> bool {
        self.flags().iter().all(|f| *f)
    }

    pub fn none(&self) -> bool {
        self.flags().iter().all(|f| !*f)
    }
}
