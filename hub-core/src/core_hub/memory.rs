//! In-process reference backend
//!
//! `MemoryBackend` plays the hosted backend: it owns the tables, enforces the
//! row-level rules (role checks, unique membership, one open invitation per
//! hub and email), runs the owner-membership trigger on hub creation, executes
//! the invitation procedures atomically and fans change notifications out to
//! subscribers. Each `MemoryGateway` is a client authenticated as one
//! identity.
//!
//! Tests use the fault and latency hooks to exercise failure paths.

use super::error::{GatewayError, RejectCode};
use super::gateway::{
    ChangeEvent, ChangeFilter, ChangeKind, ChangeStream, GatewayResult, HubMembership, Procedure,
    ProcedureArgs, ProcedureResult, RemoteGateway, Table,
};
use super::hub::{validate_hub_name, Hub, HubPatch, NewHub};
use super::invitation::{HubInvitation, NewInvitation};
use super::member::{HubMember, HubRole};
use super::session::{Identity, UserProfile};
use super::settings::UserSettings;
use super::types::{is_valid_email, normalize_email, HubId, InvitationId, MemberId, Timestamp, UserId};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, trace};

/// Gateway calls, used to target injected faults and count round trips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentUser,
    SignOut,
    FetchProfile,
    ListUserHubs,
    InsertHub,
    UpdateHub,
    DeleteHub,
    ListMembers,
    DeleteMember,
    DeleteMembership,
    UpdateMemberRole,
    ListHubInvitations,
    ListReceivedInvitations,
    InsertInvitation,
    DeleteInvitation,
    CallProcedure,
    FetchSettings,
    SaveSettings,
    Subscribe,
}

#[derive(Debug, Clone)]
struct MemberRow {
    id: MemberId,
    hub_id: HubId,
    user_id: UserId,
    role: HubRole,
    joined_at: Timestamp,
    invited_by: Option<UserId>,
}

impl MemberRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "hub_id": self.hub_id,
            "user_id": self.user_id,
            "role": self.role,
        })
    }
}

fn invitation_json(inv: &HubInvitation) -> Value {
    json!({
        "id": inv.id,
        "hub_id": inv.hub_id,
        "email": inv.email,
        "role": inv.role,
    })
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<UserId, UserProfile>,
    hubs: HashMap<HubId, Hub>,
    members: HashMap<MemberId, MemberRow>,
    invitations: HashMap<InvitationId, HubInvitation>,
    settings: HashMap<UserId, UserSettings>,
    /// Last issued timestamp; keeps creation order strict within a millisecond
    clock: u64,
}

impl Tables {
    fn tick(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.clock + 1);
        self.clock = now;
        Timestamp(now)
    }

    fn membership(&self, hub_id: &HubId, user_id: &UserId) -> Option<&MemberRow> {
        self.members
            .values()
            .find(|m| &m.hub_id == hub_id && &m.user_id == user_id)
    }

    fn role_of(&self, hub_id: &HubId, user_id: &UserId) -> Option<HubRole> {
        self.membership(hub_id, user_id).map(|m| m.role)
    }

    fn email_of(&self, user_id: &UserId) -> Option<&str> {
        self.profiles.get(user_id).map(|p| p.email.as_str())
    }

    fn profile_by_email(&self, email: &str) -> Option<&UserProfile> {
        self.profiles.values().find(|p| p.email == email)
    }

    fn member_view(&self, row: &MemberRow) -> HubMember {
        let profile = self.profiles.get(&row.user_id);
        HubMember {
            id: row.id.clone(),
            hub_id: row.hub_id.clone(),
            user_id: row.user_id.clone(),
            role: row.role,
            joined_at: row.joined_at,
            invited_by: row.invited_by.clone(),
            email: profile.map(|p| p.email.clone()).unwrap_or_default(),
            display_name: profile.and_then(|p| p.display_name.clone()),
        }
    }

    fn invitation_view(&self, inv: &HubInvitation) -> HubInvitation {
        let mut view = inv.clone();
        view.hub_name = self.hubs.get(&inv.hub_id).map(|h| h.name.clone());
        view.is_expired = false;
        view
    }

    fn is_addressed_to(&self, inv: &HubInvitation, user_id: &UserId) -> bool {
        inv.invitee_id.as_ref() == Some(user_id)
            || self.email_of(user_id).map(|e| e == inv.email).unwrap_or(false)
    }

    fn require_role(
        &self,
        hub_id: &HubId,
        user_id: &UserId,
        allowed: impl Fn(HubRole) -> bool,
        denial: &str,
    ) -> GatewayResult<HubRole> {
        match self.role_of(hub_id, user_id) {
            Some(role) if allowed(role) => Ok(role),
            _ => Err(GatewayError::Forbidden(denial.to_string())),
        }
    }
}

struct Subscriber {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// Shared in-process backend
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    subscribers: Mutex<Vec<Subscriber>>,
    faults: Mutex<Vec<Operation>>,
    hub_delays: Mutex<HashMap<HubId, Duration>>,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sign up a new identity and create its profile row
    pub async fn register_user(&self, email: &str, display_name: Option<&str>) -> Identity {
        let mut tables = self.tables.write().await;
        let created_at = tables.tick();
        let profile = UserProfile {
            id: UserId::generate(),
            email: normalize_email(email),
            display_name: display_name.map(str::to_string),
            created_at,
        };
        let identity = Identity::from(&profile);
        tables.profiles.insert(profile.id.clone(), profile);
        identity
    }

    /// Client authenticated as `identity`
    pub fn client(self: &Arc<Self>, identity: &Identity) -> MemoryGateway {
        MemoryGateway {
            backend: Arc::clone(self),
            user: RwLock::new(Some(identity.id.clone())),
        }
    }

    /// Client with no authenticated identity
    pub fn anonymous_client(self: &Arc<Self>) -> MemoryGateway {
        MemoryGateway {
            backend: Arc::clone(self),
            user: RwLock::new(None),
        }
    }

    /// Make the next call of `op` fail with a transport error
    pub async fn fail_next(&self, op: Operation) {
        self.faults.lock().await.push(op);
    }

    /// Delay member and invitation listings of one hub
    pub async fn delay_hub(&self, hub_id: &HubId, delay: Duration) {
        self.hub_delays.lock().await.insert(hub_id.clone(), delay);
    }

    /// Number of calls of `op` that reached the backend
    pub async fn call_count(&self, op: Operation) -> usize {
        self.calls.lock().await.get(&op).copied().unwrap_or(0)
    }

    /// Insert an invitation row directly, bypassing every rule
    pub async fn seed_invitation(
        &self,
        hub_id: &HubId,
        email: &str,
        role: HubRole,
        invited_by: &UserId,
        expires_at: Timestamp,
    ) -> HubInvitation {
        let mut tables = self.tables.write().await;
        let email = normalize_email(email);
        let invitation = HubInvitation {
            id: InvitationId::generate(),
            hub_id: hub_id.clone(),
            hub_name: None,
            invitee_id: tables.profile_by_email(&email).map(|p| p.id.clone()),
            email,
            role,
            invited_by: invited_by.clone(),
            created_at: tables.tick(),
            expires_at,
            accepted_at: None,
            is_expired: false,
        };
        tables
            .invitations
            .insert(invitation.id.clone(), invitation.clone());
        invitation
    }

    /// Members of a hub as stored, ignoring authorization
    pub async fn members_of(&self, hub_id: &HubId) -> Vec<HubMember> {
        let tables = self.tables.read().await;
        let mut members: Vec<_> = tables
            .members
            .values()
            .filter(|m| &m.hub_id == hub_id)
            .map(|m| tables.member_view(m))
            .collect();
        members.sort_by_key(|m| m.joined_at);
        members
    }

    pub async fn invitation_exists(&self, invitation_id: &InvitationId) -> bool {
        self.tables.read().await.invitations.contains_key(invitation_id)
    }

    /// Number of live change subscriptions
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    /// Deliver a change notification to every matching subscriber
    pub async fn emit_change(&self, table: Table, kind: ChangeKind, row: Value) {
        let event = ChangeEvent { table, kind, row };
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| {
            if s.filter.matches(table, &event.row) {
                s.tx.send(event.clone()).is_ok()
            } else {
                !s.tx.is_closed()
            }
        });
        trace!(table = %table, ?kind, "Change emitted");
    }

    async fn enter(&self, op: Operation) -> GatewayResult<()> {
        *self.calls.lock().await.entry(op).or_insert(0) += 1;

        let mut faults = self.faults.lock().await;
        if let Some(pos) = faults.iter().position(|f| *f == op) {
            faults.remove(pos);
            debug!(?op, "Injecting gateway failure");
            return Err(GatewayError::Transport(format!("injected failure in {:?}", op)));
        }
        Ok(())
    }

    async fn hub_delay(&self, hub_id: &HubId) {
        let delay = self.hub_delays.lock().await.get(hub_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Client of a `MemoryBackend`, authenticated as at most one identity
pub struct MemoryGateway {
    backend: Arc<MemoryBackend>,
    user: RwLock<Option<UserId>>,
}

impl MemoryGateway {
    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    async fn begin(&self, op: Operation) -> GatewayResult<UserId> {
        self.backend.enter(op).await?;
        self.user.read().await.clone().ok_or(GatewayError::Unauthorized)
    }

    fn ensure_self(caller: &UserId, user_id: &UserId) -> GatewayResult<()> {
        if caller != user_id {
            return Err(GatewayError::Forbidden(
                "cannot act on behalf of another user".to_string(),
            ));
        }
        Ok(())
    }

    async fn accept(
        &self,
        caller: &UserId,
        invitation_id: &InvitationId,
    ) -> GatewayResult<ProcedureResult> {
        let mut tables = self.backend.tables.write().await;

        let Some(invitation) = tables.invitations.get(invitation_id).cloned() else {
            return Ok(ProcedureResult::failed("Invitation not found"));
        };
        if !tables.is_addressed_to(&invitation, caller) {
            return Ok(ProcedureResult::failed("Invitation is addressed to another user"));
        }
        if invitation.accepted_at.is_some() {
            return Ok(ProcedureResult::failed("Invitation has already been accepted"));
        }
        if invitation.expired_at(Timestamp::now()) {
            return Err(GatewayError::rejected(
                RejectCode::InvitationExpired,
                "Invitation has expired",
            ));
        }
        if !tables.hubs.contains_key(&invitation.hub_id) {
            return Ok(ProcedureResult::failed("Hub not found"));
        }
        if tables.membership(&invitation.hub_id, caller).is_some() {
            return Ok(ProcedureResult::failed("You are already a member of this hub"));
        }

        let row = MemberRow {
            id: MemberId::generate(),
            hub_id: invitation.hub_id.clone(),
            user_id: caller.clone(),
            role: invitation.role,
            joined_at: tables.tick(),
            invited_by: Some(invitation.invited_by.clone()),
        };
        tables.members.insert(row.id.clone(), row.clone());
        tables.invitations.remove(invitation_id);
        drop(tables);

        self.backend
            .emit_change(Table::HubMembers, ChangeKind::Insert, row.to_json())
            .await;
        self.backend
            .emit_change(Table::HubInvitations, ChangeKind::Delete, invitation_json(&invitation))
            .await;

        Ok(ProcedureResult::ok(Some(json!({
            "hub_id": row.hub_id,
            "member_id": row.id,
        }))))
    }

    async fn decline(&self, caller: &UserId, invitation_id: &InvitationId) -> ProcedureResult {
        let mut tables = self.backend.tables.write().await;

        let Some(invitation) = tables.invitations.get(invitation_id).cloned() else {
            return ProcedureResult::failed("Invitation not found");
        };
        if !tables.is_addressed_to(&invitation, caller) {
            return ProcedureResult::failed("Invitation is addressed to another user");
        }
        tables.invitations.remove(invitation_id);
        drop(tables);

        self.backend
            .emit_change(Table::HubInvitations, ChangeKind::Delete, invitation_json(&invitation))
            .await;
        ProcedureResult::ok(None)
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn current_user(&self) -> GatewayResult<Option<Identity>> {
        self.backend.enter(Operation::CurrentUser).await?;
        let Some(user_id) = self.user.read().await.clone() else {
            return Ok(None);
        };
        let tables = self.backend.tables.read().await;
        Ok(tables.profiles.get(&user_id).map(Identity::from))
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        self.backend.enter(Operation::SignOut).await?;
        *self.user.write().await = None;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &UserId) -> GatewayResult<Option<UserProfile>> {
        self.begin(Operation::FetchProfile).await?;
        Ok(self.backend.tables.read().await.profiles.get(user_id).cloned())
    }

    async fn list_user_hubs(&self, user_id: &UserId) -> GatewayResult<Vec<HubMembership>> {
        let caller = self.begin(Operation::ListUserHubs).await?;
        Self::ensure_self(&caller, user_id)?;

        let tables = self.backend.tables.read().await;
        let mut hubs: Vec<HubMembership> = tables
            .members
            .values()
            .filter(|m| &m.user_id == user_id)
            .filter_map(|m| {
                tables.hubs.get(&m.hub_id).map(|hub| HubMembership {
                    hub: hub.clone(),
                    role: m.role,
                })
            })
            .collect();
        hubs.sort_by(|a, b| b.hub.created_at.cmp(&a.hub.created_at));
        Ok(hubs)
    }

    async fn insert_hub(&self, new_hub: &NewHub) -> GatewayResult<Hub> {
        let caller = self.begin(Operation::InsertHub).await?;
        validate_hub_name(&new_hub.name)
            .map_err(|msg| GatewayError::rejected(RejectCode::Constraint, msg))?;

        let mut tables = self.backend.tables.write().await;
        let now = tables.tick();
        let hub = Hub {
            id: HubId::generate(),
            name: new_hub.name.trim().to_string(),
            description: new_hub.description.clone(),
            created_by: caller.clone(),
            settings: new_hub.settings.clone(),
            created_at: now,
            updated_at: now,
        };
        // Owner membership is written with the hub, as the backend trigger does
        let owner = MemberRow {
            id: MemberId::generate(),
            hub_id: hub.id.clone(),
            user_id: caller,
            role: HubRole::Owner,
            joined_at: now,
            invited_by: None,
        };
        tables.hubs.insert(hub.id.clone(), hub.clone());
        tables.members.insert(owner.id.clone(), owner.clone());
        drop(tables);

        self.backend
            .emit_change(Table::Hubs, ChangeKind::Insert, json!({"id": hub.id, "hub_id": hub.id}))
            .await;
        self.backend
            .emit_change(Table::HubMembers, ChangeKind::Insert, owner.to_json())
            .await;
        Ok(hub)
    }

    async fn update_hub(&self, hub_id: &HubId, patch: &HubPatch) -> GatewayResult<Hub> {
        let caller = self.begin(Operation::UpdateHub).await?;
        if let Some(name) = &patch.name {
            validate_hub_name(name)
                .map_err(|msg| GatewayError::rejected(RejectCode::Constraint, msg))?;
        }

        let mut tables = self.backend.tables.write().await;
        if !tables.hubs.contains_key(hub_id) {
            return Err(GatewayError::NotFound("Hub".to_string()));
        }
        tables.require_role(
            hub_id,
            &caller,
            |r| r.is_manager_or_owner(),
            "only owners and managers can update the hub",
        )?;

        let updated_at = tables.tick();
        let hub = tables
            .hubs
            .get_mut(hub_id)
            .ok_or_else(|| GatewayError::NotFound("Hub".to_string()))?;
        hub.apply(patch);
        hub.updated_at = updated_at;
        let hub = hub.clone();
        drop(tables);

        self.backend
            .emit_change(Table::Hubs, ChangeKind::Update, json!({"id": hub.id, "hub_id": hub.id}))
            .await;
        Ok(hub)
    }

    async fn delete_hub(&self, hub_id: &HubId) -> GatewayResult<()> {
        let caller = self.begin(Operation::DeleteHub).await?;

        let mut tables = self.backend.tables.write().await;
        if !tables.hubs.contains_key(hub_id) {
            return Err(GatewayError::NotFound("Hub".to_string()));
        }
        tables.require_role(
            hub_id,
            &caller,
            |r| r == HubRole::Owner,
            "only the hub owner can delete the hub",
        )?;

        tables.hubs.remove(hub_id);
        let removed_members: Vec<MemberRow> = tables
            .members
            .values()
            .filter(|m| &m.hub_id == hub_id)
            .cloned()
            .collect();
        tables.members.retain(|_, m| &m.hub_id != hub_id);
        let removed_invitations: Vec<HubInvitation> = tables
            .invitations
            .values()
            .filter(|i| &i.hub_id == hub_id)
            .cloned()
            .collect();
        tables.invitations.retain(|_, i| &i.hub_id != hub_id);
        drop(tables);

        self.backend
            .emit_change(Table::Hubs, ChangeKind::Delete, json!({"id": hub_id, "hub_id": hub_id}))
            .await;
        for row in &removed_members {
            self.backend
                .emit_change(Table::HubMembers, ChangeKind::Delete, row.to_json())
                .await;
        }
        for inv in &removed_invitations {
            self.backend
                .emit_change(Table::HubInvitations, ChangeKind::Delete, invitation_json(inv))
                .await;
        }
        Ok(())
    }

    async fn list_members(&self, hub_id: &HubId) -> GatewayResult<Vec<HubMember>> {
        let caller = self.begin(Operation::ListMembers).await?;
        self.backend.hub_delay(hub_id).await;

        let tables = self.backend.tables.read().await;
        tables.require_role(hub_id, &caller, |_| true, "not a member of this hub")?;

        let mut members: Vec<HubMember> = tables
            .members
            .values()
            .filter(|m| &m.hub_id == hub_id)
            .map(|m| tables.member_view(m))
            .collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    async fn delete_member(&self, member_id: &MemberId) -> GatewayResult<()> {
        let caller = self.begin(Operation::DeleteMember).await?;

        let mut tables = self.backend.tables.write().await;
        let row = tables
            .members
            .get(member_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Member".to_string()))?;

        if row.user_id != caller {
            tables.require_role(
                &row.hub_id,
                &caller,
                |r| r.is_manager_or_owner(),
                "only owners and managers can remove members",
            )?;
        }
        if row.role == HubRole::Owner {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                "The hub owner cannot be removed",
            ));
        }

        tables.members.remove(member_id);
        drop(tables);

        self.backend
            .emit_change(Table::HubMembers, ChangeKind::Delete, row.to_json())
            .await;
        Ok(())
    }

    async fn delete_membership(&self, hub_id: &HubId, user_id: &UserId) -> GatewayResult<()> {
        let caller = self.begin(Operation::DeleteMembership).await?;
        Self::ensure_self(&caller, user_id)?;

        let mut tables = self.backend.tables.write().await;
        let row = tables
            .membership(hub_id, user_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Membership".to_string()))?;
        if row.role == HubRole::Owner {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                "The hub owner cannot leave; delete the hub instead",
            ));
        }
        tables.members.remove(&row.id);
        drop(tables);

        self.backend
            .emit_change(Table::HubMembers, ChangeKind::Delete, row.to_json())
            .await;
        Ok(())
    }

    async fn update_member_role(
        &self,
        member_id: &MemberId,
        role: HubRole,
    ) -> GatewayResult<HubMember> {
        let caller = self.begin(Operation::UpdateMemberRole).await?;

        let mut tables = self.backend.tables.write().await;
        let row = tables
            .members
            .get(member_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Member".to_string()))?;
        tables.require_role(
            &row.hub_id,
            &caller,
            |r| r == HubRole::Owner,
            "only the hub owner can change roles",
        )?;
        if !role.is_grantable() {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                "Ownership cannot be granted",
            ));
        }
        if row.role == HubRole::Owner {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                "The owner's role cannot be changed",
            ));
        }

        let Some(stored) = tables.members.get_mut(member_id) else {
            return Err(GatewayError::NotFound("Member".to_string()));
        };
        stored.role = role;
        let updated = stored.clone();
        let view = tables.member_view(&updated);
        drop(tables);

        self.backend
            .emit_change(Table::HubMembers, ChangeKind::Update, updated.to_json())
            .await;
        Ok(view)
    }

    async fn list_hub_invitations(&self, hub_id: &HubId) -> GatewayResult<Vec<HubInvitation>> {
        let caller = self.begin(Operation::ListHubInvitations).await?;
        self.backend.hub_delay(hub_id).await;

        let tables = self.backend.tables.read().await;
        tables.require_role(hub_id, &caller, |_| true, "not a member of this hub")?;

        let mut invitations: Vec<HubInvitation> = tables
            .invitations
            .values()
            .filter(|i| &i.hub_id == hub_id && i.accepted_at.is_none())
            .map(|i| tables.invitation_view(i))
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn list_received_invitations(
        &self,
        user_id: &UserId,
        email: &str,
    ) -> GatewayResult<Vec<HubInvitation>> {
        let caller = self.begin(Operation::ListReceivedInvitations).await?;
        Self::ensure_self(&caller, user_id)?;
        let email = normalize_email(email);

        let tables = self.backend.tables.read().await;
        let mut invitations: Vec<HubInvitation> = tables
            .invitations
            .values()
            .filter(|i| {
                i.accepted_at.is_none()
                    && (i.invitee_id.as_ref() == Some(user_id) || i.email == email)
            })
            .map(|i| tables.invitation_view(i))
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    async fn insert_invitation(&self, new: &NewInvitation) -> GatewayResult<HubInvitation> {
        let caller = self.begin(Operation::InsertInvitation).await?;
        let email = normalize_email(&new.email);
        if !is_valid_email(&email) {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                format!("Invalid email address: {}", new.email),
            ));
        }
        if !new.role.is_grantable() {
            return Err(GatewayError::rejected(
                RejectCode::Constraint,
                "Invitations can only grant the manager or member role",
            ));
        }

        let mut tables = self.backend.tables.write().await;
        if !tables.hubs.contains_key(&new.hub_id) {
            return Err(GatewayError::NotFound("Hub".to_string()));
        }
        tables.require_role(
            &new.hub_id,
            &caller,
            |r| r.is_manager_or_owner(),
            "only owners and managers can invite members",
        )?;

        let already_member = tables
            .members
            .values()
            .filter(|m| m.hub_id == new.hub_id)
            .any(|m| tables.email_of(&m.user_id) == Some(email.as_str()));
        if already_member {
            return Err(GatewayError::rejected(RejectCode::AlreadyMember, email));
        }

        let now = Timestamp::now();
        if tables
            .invitations
            .values()
            .any(|i| i.hub_id == new.hub_id && i.is_open_for(&email, now))
        {
            return Err(GatewayError::rejected(RejectCode::DuplicateInvitation, email));
        }

        // Expired, unanswered invitations for the same address are replaced
        let stale: Vec<HubInvitation> = tables
            .invitations
            .values()
            .filter(|i| i.hub_id == new.hub_id && i.email == email && i.accepted_at.is_none())
            .cloned()
            .collect();
        for inv in &stale {
            tables.invitations.remove(&inv.id);
        }

        let invitation = HubInvitation {
            id: InvitationId::generate(),
            hub_id: new.hub_id.clone(),
            hub_name: None,
            invitee_id: tables.profile_by_email(&email).map(|p| p.id.clone()),
            email,
            role: new.role,
            invited_by: caller,
            created_at: tables.tick(),
            expires_at: new.expires_at,
            accepted_at: None,
            is_expired: false,
        };
        tables
            .invitations
            .insert(invitation.id.clone(), invitation.clone());
        let view = tables.invitation_view(&invitation);
        drop(tables);

        for inv in &stale {
            self.backend
                .emit_change(Table::HubInvitations, ChangeKind::Delete, invitation_json(inv))
                .await;
        }
        self.backend
            .emit_change(Table::HubInvitations, ChangeKind::Insert, invitation_json(&invitation))
            .await;
        Ok(view)
    }

    async fn delete_invitation(&self, invitation_id: &InvitationId) -> GatewayResult<()> {
        let caller = self.begin(Operation::DeleteInvitation).await?;

        let mut tables = self.backend.tables.write().await;
        let invitation = tables
            .invitations
            .get(invitation_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound("Invitation".to_string()))?;
        if invitation.invited_by != caller {
            tables.require_role(
                &invitation.hub_id,
                &caller,
                |r| r.is_manager_or_owner(),
                "only owners, managers or the inviter can cancel an invitation",
            )?;
        }
        tables.invitations.remove(invitation_id);
        drop(tables);

        self.backend
            .emit_change(Table::HubInvitations, ChangeKind::Delete, invitation_json(&invitation))
            .await;
        Ok(())
    }

    async fn call_procedure(
        &self,
        procedure: Procedure,
        args: &ProcedureArgs,
    ) -> GatewayResult<ProcedureResult> {
        let caller = self.begin(Operation::CallProcedure).await?;
        if caller != args.user_id {
            return Ok(ProcedureResult::failed("Not authorized"));
        }

        debug!(procedure = procedure.as_str(), invitation_id = %args.invitation_id, "Running procedure");
        match procedure {
            Procedure::AcceptHubInvitation => self.accept(&caller, &args.invitation_id).await,
            Procedure::DeclineHubInvitation => Ok(self.decline(&caller, &args.invitation_id).await),
        }
    }

    async fn fetch_settings(&self, user_id: &UserId) -> GatewayResult<Option<UserSettings>> {
        let caller = self.begin(Operation::FetchSettings).await?;
        Self::ensure_self(&caller, user_id)?;
        Ok(self.backend.tables.read().await.settings.get(user_id).cloned())
    }

    async fn save_settings(
        &self,
        user_id: &UserId,
        settings: &UserSettings,
    ) -> GatewayResult<UserSettings> {
        let caller = self.begin(Operation::SaveSettings).await?;
        Self::ensure_self(&caller, user_id)?;

        let mut tables = self.backend.tables.write().await;
        let mut saved = settings.clone();
        saved.updated_at = Some(tables.tick());
        tables.settings.insert(user_id.clone(), saved.clone());
        Ok(saved)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> GatewayResult<ChangeStream> {
        self.begin(Operation::Subscribe).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(table = %filter.table, filter = %filter.expression(), "Opening change feed");
        self.backend.subscribers.lock().await.push(Subscriber {
            filter: filter.clone(),
            tx,
        });
        Ok(ChangeStream::new(filter, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_hub::error::HubError;

    async fn backend_with_owner() -> (Arc<MemoryBackend>, Identity, MemoryGateway, Hub) {
        let backend = MemoryBackend::new();
        let owner = backend.register_user("owner@example.com", Some("Owner")).await;
        let client = backend.client(&owner);
        let hub = client.insert_hub(&NewHub::named("Jones Family")).await.unwrap();
        (backend, owner, client, hub)
    }

    fn invite(hub: &Hub, inviter: &Identity, email: &str, role: HubRole) -> NewInvitation {
        NewInvitation {
            hub_id: hub.id.clone(),
            email: email.to_string(),
            role,
            invited_by: inviter.id.clone(),
            expires_at: Timestamp::now().after(Duration::from_secs(3600)),
        }
    }

    #[tokio::test]
    async fn test_hub_creation_makes_creator_owner() {
        let (backend, owner, client, hub) = backend_with_owner().await;

        let members = backend.members_of(&hub.id).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, owner.id);
        assert_eq!(members[0].role, HubRole::Owner);

        let hubs = client.list_user_hubs(&owner.id).await.unwrap();
        assert_eq!(hubs.len(), 1);
        assert_eq!(hubs[0].role, HubRole::Owner);
    }

    #[tokio::test]
    async fn test_user_hubs_are_newest_first() {
        let (_backend, owner, client, first) = backend_with_owner().await;
        let second = client.insert_hub(&NewHub::named("Cabin")).await.unwrap();

        let hubs = client.list_user_hubs(&owner.id).await.unwrap();
        let ids: Vec<_> = hubs.iter().map(|h| h.hub.id.clone()).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_cannot_list_another_users_hubs() {
        let (backend, owner, _client, _hub) = backend_with_owner().await;
        let other = backend.register_user("other@example.com", None).await;
        let result = backend.client(&other).list_user_hubs(&owner.id).await;
        assert!(matches!(result, Err(GatewayError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_duplicate_open_invitation_is_rejected() {
        let (_backend, owner, client, hub) = backend_with_owner().await;
        client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Member))
            .await
            .unwrap();

        let result = client
            .insert_invitation(&invite(&hub, &owner, "M@Example.com ", HubRole::Manager))
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Rejected { code: RejectCode::DuplicateInvitation, .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_invitation_is_replaced() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let stale = backend
            .seed_invitation(
                &hub.id,
                "m@example.com",
                HubRole::Member,
                &owner.id,
                Timestamp::now().before(Duration::from_secs(60)),
            )
            .await;

        let fresh = client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Member))
            .await
            .unwrap();
        assert!(!backend.invitation_exists(&stale.id).await);
        assert!(backend.invitation_exists(&fresh.id).await);
    }

    #[tokio::test]
    async fn test_member_cannot_invite() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let member = backend.register_user("m@example.com", None).await;
        let inv = client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Member))
            .await
            .unwrap();
        let member_client = backend.client(&member);
        let args = ProcedureArgs {
            invitation_id: inv.id,
            user_id: member.id.clone(),
        };
        assert!(member_client
            .call_procedure(Procedure::AcceptHubInvitation, &args)
            .await
            .unwrap()
            .success);

        let result = member_client
            .insert_invitation(&invite(&hub, &member, "x@example.com", HubRole::Member))
            .await;
        assert!(matches!(result, Err(GatewayError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_accept_is_atomic_and_single_use() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let invitee = backend.register_user("m@example.com", None).await;
        let inv = client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Manager))
            .await
            .unwrap();
        assert_eq!(inv.invitee_id.as_ref(), Some(&invitee.id));

        let invitee_client = backend.client(&invitee);
        let args = ProcedureArgs {
            invitation_id: inv.id.clone(),
            user_id: invitee.id.clone(),
        };
        let first = invitee_client
            .call_procedure(Procedure::AcceptHubInvitation, &args)
            .await
            .unwrap();
        assert!(first.success);
        assert!(!backend.invitation_exists(&inv.id).await);

        let second = invitee_client
            .call_procedure(Procedure::AcceptHubInvitation, &args)
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(second.error.as_deref(), Some("Invitation not found"));

        let members = backend.members_of(&hub.id).await;
        assert_eq!(members.iter().filter(|m| m.user_id == invitee.id).count(), 1);
    }

    #[tokio::test]
    async fn test_accept_of_expired_invitation_is_rejected() {
        let (backend, owner, _client, hub) = backend_with_owner().await;
        let invitee = backend.register_user("m@example.com", None).await;
        let inv = backend
            .seed_invitation(
                &hub.id,
                "m@example.com",
                HubRole::Member,
                &owner.id,
                Timestamp::now().before(Duration::from_secs(60)),
            )
            .await;

        let result = backend
            .client(&invitee)
            .call_procedure(
                Procedure::AcceptHubInvitation,
                &ProcedureArgs {
                    invitation_id: inv.id.clone(),
                    user_id: invitee.id.clone(),
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Rejected { code: RejectCode::InvitationExpired, .. })
        ));
        assert!(matches!(
            HubError::from(result.unwrap_err()),
            HubError::InvitationExpired
        ));
        assert!(backend.invitation_exists(&inv.id).await);
        assert_eq!(backend.members_of(&hub.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_accept_for_someone_else_fails() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let intruder = backend.register_user("intruder@example.com", None).await;
        let inv = client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Member))
            .await
            .unwrap();

        let result = backend
            .client(&intruder)
            .call_procedure(
                Procedure::AcceptHubInvitation,
                &ProcedureArgs {
                    invitation_id: inv.id.clone(),
                    user_id: intruder.id.clone(),
                },
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(backend.invitation_exists(&inv.id).await);
    }

    #[tokio::test]
    async fn test_owner_cannot_leave_or_be_demoted() {
        let (backend, owner, client, hub) = backend_with_owner().await;

        let leave = client.delete_membership(&hub.id, &owner.id).await;
        assert!(matches!(leave, Err(GatewayError::Rejected { .. })));

        let owner_row = backend.members_of(&hub.id).await.remove(0);
        let demote = client.update_member_role(&owner_row.id, HubRole::Member).await;
        assert!(matches!(demote, Err(GatewayError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_delete_hub_cascades() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let inv = client
            .insert_invitation(&invite(&hub, &owner, "m@example.com", HubRole::Member))
            .await
            .unwrap();

        client.delete_hub(&hub.id).await.unwrap();
        assert!(backend.members_of(&hub.id).await.is_empty());
        assert!(!backend.invitation_exists(&inv.id).await);
        assert!(client.list_user_hubs(&owner.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_feed_is_filtered_by_hub() {
        let (backend, owner, client, hub) = backend_with_owner().await;
        let other_hub = client.insert_hub(&NewHub::named("Cabin")).await.unwrap();

        let mut feed = client
            .subscribe(ChangeFilter::for_hub(Table::HubInvitations, &hub.id))
            .await
            .unwrap();

        client
            .insert_invitation(&invite(&other_hub, &owner, "a@example.com", HubRole::Member))
            .await
            .unwrap();
        assert!(feed.try_recv().is_none());

        client
            .insert_invitation(&invite(&hub, &owner, "b@example.com", HubRole::Member))
            .await
            .unwrap();
        let event = feed.try_recv().expect("event for subscribed hub");
        assert_eq!(event.table, Table::HubInvitations);
        assert_eq!(event.kind, ChangeKind::Insert);

        drop(feed);
        assert_eq!(backend.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_injected_fault_hits_once() {
        let (backend, owner, client, _hub) = backend_with_owner().await;
        backend.fail_next(Operation::ListUserHubs).await;

        assert!(matches!(
            client.list_user_hubs(&owner.id).await,
            Err(GatewayError::Transport(_))
        ));
        assert!(client.list_user_hubs(&owner.id).await.is_ok());
        assert_eq!(backend.call_count(Operation::ListUserHubs).await, 2);
    }

    #[tokio::test]
    async fn test_signed_out_client_is_unauthorized() {
        let (_backend, owner, client, _hub) = backend_with_owner().await;
        client.sign_out().await.unwrap();

        assert_eq!(client.current_user().await.unwrap(), None);
        assert_eq!(
            client.list_user_hubs(&owner.id).await,
            Err(GatewayError::Unauthorized)
        );
    }
}
