//! Hub invitation lifecycle
//!
//! An invitation moves `created → {accepted | declined | cancelled | expired}`.
//! Declined and cancelled invitations are deleted rows; accepted ones are
//! consumed by the acceptance procedure. Expiry is never stored: it is derived
//! from `expires_at` whenever a list is fetched.

use super::member::HubRole;
use super::types::{HubId, InvitationId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Invitation row as seen by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubInvitation {
    /// Unique identifier
    pub id: InvitationId,

    /// Target hub
    pub hub_id: HubId,

    /// Hub name, joined in for the invitee's list
    #[serde(default)]
    pub hub_name: Option<String>,

    /// Invitee email, normalised
    pub email: String,

    /// Invitee account when the email already maps to one
    pub invitee_id: Option<UserId>,

    /// Role granted on acceptance
    pub role: HubRole,

    /// Who created the invitation
    pub invited_by: UserId,

    pub created_at: Timestamp,

    pub expires_at: Timestamp,

    pub accepted_at: Option<Timestamp>,

    /// Client-side expiry flag, recomputed on every fetch
    #[serde(default, skip_serializing)]
    pub is_expired: bool,
}

impl HubInvitation {
    /// Whether `expires_at` has passed at `now`
    pub fn expired_at(&self, now: Timestamp) -> bool {
        self.expires_at <= now
    }

    /// Recompute `is_expired` against `now`
    pub fn with_expiry(mut self, now: Timestamp) -> Self {
        self.is_expired = self.expired_at(now);
        self
    }

    pub fn status(&self) -> InvitationStatus {
        if self.accepted_at.is_some() {
            InvitationStatus::Accepted
        } else if self.is_expired {
            InvitationStatus::Expired
        } else {
            InvitationStatus::Pending
        }
    }

    /// Whether this invitation is still open for the given email
    pub fn is_open_for(&self, email: &str, now: Timestamp) -> bool {
        self.accepted_at.is_none() && !self.expired_at(now) && self.email == email
    }
}

/// Observable invitation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
}

/// Caller input for `invite_member`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub role: HubRole,
}

impl InviteRequest {
    pub fn new(email: impl Into<String>, role: HubRole) -> Self {
        Self {
            email: email.into(),
            role,
        }
    }
}

/// Row sent to the backend when creating an invitation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvitation {
    pub hub_id: HubId,
    pub email: String,
    pub role: HubRole,
    pub invited_by: UserId,
    pub expires_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(expires_at: u64) -> HubInvitation {
        HubInvitation {
            id: InvitationId::new("inv-1"),
            hub_id: HubId::new("hub-1"),
            hub_name: None,
            email: "m@example.com".to_string(),
            invitee_id: None,
            role: HubRole::Member,
            invited_by: UserId::new("owner"),
            created_at: Timestamp::from_millis(0),
            expires_at: Timestamp::from_millis(expires_at),
            accepted_at: None,
            is_expired: false,
        }
    }

    #[test]
    fn test_expiry_is_derived_from_now() {
        let inv = invitation(1_000);
        assert!(!inv.clone().with_expiry(Timestamp::from_millis(999)).is_expired);
        assert!(inv.clone().with_expiry(Timestamp::from_millis(1_000)).is_expired);
        assert_eq!(
            inv.with_expiry(Timestamp::from_millis(5_000)).status(),
            InvitationStatus::Expired
        );
    }

    #[test]
    fn test_status() {
        let mut inv = invitation(1_000);
        assert_eq!(inv.status(), InvitationStatus::Pending);

        inv.accepted_at = Some(Timestamp::from_millis(10));
        assert_eq!(inv.status(), InvitationStatus::Accepted);
    }

    #[test]
    fn test_is_open_for() {
        let inv = invitation(1_000);
        let now = Timestamp::from_millis(500);
        assert!(inv.is_open_for("m@example.com", now));
        assert!(!inv.is_open_for("x@example.com", now));
        assert!(!inv.is_open_for("m@example.com", Timestamp::from_millis(2_000)));
    }

    #[test]
    fn test_is_expired_is_not_serialized() {
        let inv = invitation(1_000).with_expiry(Timestamp::from_millis(5_000));
        let json = serde_json::to_value(&inv).unwrap();
        assert!(json.get("is_expired").is_none());
    }
}
