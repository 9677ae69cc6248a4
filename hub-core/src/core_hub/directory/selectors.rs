//! Read-only derivations over a directory snapshot

use super::state::DirectoryState;
use crate::core_hub::hub::Hub;
use crate::core_hub::invitation::HubInvitation;
use crate::core_hub::member::{HubMember, HubRole};
use crate::core_hub::permissions::HubPermissions;
use crate::core_hub::types::{HubId, Timestamp, UserId};

pub fn hub_by_id<'a>(state: &'a DirectoryState, hub_id: &HubId) -> Option<&'a Hub> {
    state.user_hubs.iter().find(|h| &h.id == hub_id)
}

/// Member row of `user_id` in the current hub
pub fn member_by_user<'a>(state: &'a DirectoryState, user_id: &UserId) -> Option<&'a HubMember> {
    state.hub_members.iter().find(|m| &m.user_id == user_id)
}

/// The identity's role in `hub_id`, or in the current hub when `None`.
///
/// The loaded member list is preferred for the current hub since realtime
/// refreshes keep it fresher than the hub list.
pub fn role_in(state: &DirectoryState, hub_id: Option<&HubId>) -> Option<HubRole> {
    let user_id = state.user_id.as_ref()?;
    let hub_id = hub_id.or_else(|| state.current_hub_id())?;

    if state.is_current(hub_id) {
        if let Some(member) = member_by_user(state, user_id) {
            return Some(member.role);
        }
    }
    state.hub_roles.get(hub_id).copied()
}

pub fn current_role(state: &DirectoryState) -> Option<HubRole> {
    role_in(state, None)
}

pub fn is_owner(state: &DirectoryState) -> bool {
    current_role(state) == Some(HubRole::Owner)
}

pub fn is_manager_or_owner(state: &DirectoryState) -> bool {
    current_role(state)
        .map(|r| r.is_manager_or_owner())
        .unwrap_or(false)
}

pub fn permissions(state: &DirectoryState, hub_id: Option<&HubId>) -> HubPermissions {
    HubPermissions::for_role(role_in(state, hub_id))
}

/// Pending invites of the current hub that have not expired at `now`
pub fn active_pending_invites(state: &DirectoryState, now: Timestamp) -> Vec<&HubInvitation> {
    state
        .pending_invites
        .iter()
        .filter(|i| !i.expired_at(now))
        .collect()
}

/// Received invitations that can still be accepted at `now`
pub fn active_user_invitations(state: &DirectoryState, now: Timestamp) -> Vec<&HubInvitation> {
    state
        .user_invitations
        .iter()
        .filter(|i| i.accepted_at.is_none() && !i.expired_at(now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_hub::types::{InvitationId, MemberId};
    use serde_json::Map;

    fn hub(id: &str) -> Hub {
        Hub {
            id: HubId::new(id),
            name: id.to_string(),
            description: None,
            created_by: UserId::new("owner"),
            settings: Map::new(),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
        }
    }

    fn member(hub_id: &str, user: &str, role: HubRole) -> HubMember {
        HubMember {
            id: MemberId::new(format!("{}-{}", hub_id, user)),
            hub_id: HubId::new(hub_id),
            user_id: UserId::new(user),
            role,
            joined_at: Timestamp::from_millis(1),
            invited_by: None,
            email: format!("{}@example.com", user),
            display_name: None,
        }
    }

    fn invitation(expires_at: u64) -> HubInvitation {
        HubInvitation {
            id: InvitationId::generate(),
            hub_id: HubId::new("h1"),
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

    fn state() -> DirectoryState {
        let mut state = DirectoryState {
            user_id: Some(UserId::new("me")),
            user_hubs: vec![hub("h1"), hub("h2")],
            current_hub: Some(hub("h1")),
            hub_members: vec![member("h1", "me", HubRole::Manager)],
            ..Default::default()
        };
        state.hub_roles.insert(HubId::new("h1"), HubRole::Member);
        state.hub_roles.insert(HubId::new("h2"), HubRole::Owner);
        state
    }

    #[test]
    fn test_current_hub_prefers_member_list() {
        let state = state();
        assert_eq!(current_role(&state), Some(HubRole::Manager));
        assert!(is_manager_or_owner(&state));
        assert!(!is_owner(&state));
    }

    #[test]
    fn test_other_hub_uses_hub_roles() {
        let state = state();
        assert_eq!(role_in(&state, Some(&HubId::new("h2"))), Some(HubRole::Owner));
        assert!(permissions(&state, Some(&HubId::new("h2"))).can_delete_hub);
        assert!(permissions(&state, Some(&HubId::new("unknown"))).none());
    }

    #[test]
    fn test_no_identity_means_no_role() {
        let mut state = state();
        state.user_id = None;
        assert_eq!(current_role(&state), None);
    }

    #[test]
    fn test_active_invites_filter_expired() {
        let mut state = state();
        state.pending_invites = vec![invitation(100), invitation(10_000)];
        state.user_invitations = vec![invitation(100)];

        let now = Timestamp::from_millis(500);
        assert_eq!(active_pending_invites(&state, now).len(), 1);
        assert!(active_user_invitations(&state, now).is_empty());
    }

    #[test]
    fn test_hub_by_id() {
        let state = state();
        assert!(hub_by_id(&state, &HubId::new("h2")).is_some());
        assert!(hub_by_id(&state, &HubId::new("h3")).is_none());
    }
}
