//! Hub membership and roles

use super::types::{HubId, MemberId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hub-level roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubRole {
    /// Full control, can delete the hub and change roles
    Owner,
    /// Can manage the hub, invite and remove members
    Manager,
    /// Default role, no management capabilities
    Member,
}

impl HubRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubRole::Owner => "owner",
            HubRole::Manager => "manager",
            HubRole::Member => "member",
        }
    }

    /// Whether this role may be handed out by an invitation or role change.
    /// Ownership is only ever created by hub creation.
    pub fn is_grantable(&self) -> bool {
        !matches!(self, HubRole::Owner)
    }

    pub fn is_manager_or_owner(&self) -> bool {
        matches!(self, HubRole::Owner | HubRole::Manager)
    }
}

impl fmt::Display for HubRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HubRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(HubRole::Owner),
            "manager" => Ok(HubRole::Manager),
            "member" => Ok(HubRole::Member),
            other => Err(format!("unknown hub role: {}", other)),
        }
    }
}

/// A membership row joined with the member's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMember {
    /// Membership row id
    pub id: MemberId,

    pub hub_id: HubId,

    pub user_id: UserId,

    /// Role in the hub
    pub role: HubRole,

    /// When the member joined
    pub joined_at: Timestamp,

    /// Who invited this member (if applicable)
    pub invited_by: Option<UserId>,

    /// Member's email, normalised
    pub email: String,

    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_through_str() {
        for role in [HubRole::Owner, HubRole::Manager, HubRole::Member] {
            assert_eq!(role.as_str().parse::<HubRole>().unwrap(), role);
        }
        assert_eq!("Manager".parse::<HubRole>().unwrap(), HubRole::Manager);
        assert!("admin".parse::<HubRole>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HubRole::Manager).unwrap(), "\"manager\"");
    }

    #[test]
    fn test_owner_is_not_grantable() {
        assert!(!HubRole::Owner.is_grantable());
        assert!(HubRole::Manager.is_grantable());
        assert!(HubRole::Member.is_grantable());
    }
}
