//! Remote data gateway contract
//!
//! The hosted backend is the source of truth for hubs, memberships and
//! invitations. Everything the directory knows is fetched through this trait,
//! authenticated as a single identity.
//!
//! ```text
//! ┌──────────────┐   CRUD / procedures    ┌────────────────┐
//! │ HubDirectory │ ─────────────────────▶ │ RemoteGateway  │
//! └──────┬───────┘                        └───────┬────────┘
//!        ▲        refresh on change               │ change feed
//! ┌──────┴─────────┐ ◀───────────────────────────┘
//! │ RealtimeBridge │
//! └────────────────┘
//! ```

use super::error::GatewayError;
use super::hub::{Hub, HubPatch, NewHub};
use super::invitation::{HubInvitation, NewInvitation};
use super::member::{HubMember, HubRole};
use super::session::{Identity, UserProfile};
use super::settings::UserSettings;
use super::types::{HubId, InvitationId, MemberId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Named collections exposed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Hubs,
    HubMembers,
    HubInvitations,
    UserProfiles,
    UserSettings,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Hubs => "hubs",
            Table::HubMembers => "hub_members",
            Table::HubInvitations => "hub_invitations",
            Table::UserProfiles => "user_profiles",
            Table::UserSettings => "user_settings",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    /// Inserts the membership and consumes the invitation in one unit
    AcceptHubInvitation,
    /// Removes the invitation without creating a membership
    DeclineHubInvitation,
}

impl Procedure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::AcceptHubInvitation => "accept_hub_invitation",
            Procedure::DeclineHubInvitation => "decline_hub_invitation",
        }
    }
}

/// Arguments shared by the invitation procedures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureArgs {
    pub invitation_id: InvitationId,
    pub user_id: UserId,
}

/// `{success, error?, data?}` record returned by procedures
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcedureResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProcedureResult {
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// A hub row together with the caller's role in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMembership {
    pub hub: Hub,
    pub role: HubRole,
}

/// Row filter for a change subscription: `<column>=eq.<value>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub table: Table,
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    /// Changes on `table` scoped to one hub
    pub fn for_hub(table: Table, hub_id: &HubId) -> Self {
        Self {
            table,
            column: "hub_id".to_string(),
            value: hub_id.to_string(),
        }
    }

    /// Filter expression in the backend's syntax
    pub fn expression(&self) -> String {
        format!("{}=eq.{}", self.column, self.value)
    }

    /// Whether a changed row on `table` passes this filter
    pub fn matches(&self, table: Table, row: &Value) -> bool {
        self.table == table
            && row
                .get(&self.column)
                .and_then(Value::as_str)
                .map(|v| v == self.value)
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Untyped "something changed" notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub row: Value,
}

/// Receiving half of a change subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ChangeStream {
    filter: ChangeFilter,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(filter: ChangeFilter, rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { filter, rx }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Wait for the next event; `None` once the backend closed the feed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Authenticated client to the hosted backend
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Identity the client is authenticated as, if any
    async fn current_user(&self) -> GatewayResult<Option<Identity>>;

    /// Drop the authenticated session
    async fn sign_out(&self) -> GatewayResult<()>;

    async fn fetch_profile(&self, user_id: &UserId) -> GatewayResult<Option<UserProfile>>;

    /// Hubs the identity belongs to, newest first
    async fn list_user_hubs(&self, user_id: &UserId) -> GatewayResult<Vec<HubMembership>>;

    /// Insert a hub owned by the caller. The backend creates the owner
    /// membership in the same write.
    async fn insert_hub(&self, hub: &NewHub) -> GatewayResult<Hub>;

    async fn update_hub(&self, hub_id: &HubId, patch: &HubPatch) -> GatewayResult<Hub>;

    async fn delete_hub(&self, hub_id: &HubId) -> GatewayResult<()>;

    async fn list_members(&self, hub_id: &HubId) -> GatewayResult<Vec<HubMember>>;

    async fn delete_member(&self, member_id: &MemberId) -> GatewayResult<()>;

    /// Remove the (hub, user) membership
    async fn delete_membership(&self, hub_id: &HubId, user_id: &UserId) -> GatewayResult<()>;

    async fn update_member_role(
        &self,
        member_id: &MemberId,
        role: HubRole,
    ) -> GatewayResult<HubMember>;

    /// Unaccepted invitations of a hub, newest first
    async fn list_hub_invitations(&self, hub_id: &HubId) -> GatewayResult<Vec<HubInvitation>>;

    /// Unaccepted invitations addressed to the identity by id or email,
    /// newest first. Expired rows are included.
    async fn list_received_invitations(
        &self,
        user_id: &UserId,
        email: &str,
    ) -> GatewayResult<Vec<HubInvitation>>;

    async fn insert_invitation(&self, invitation: &NewInvitation) -> GatewayResult<HubInvitation>;

    async fn delete_invitation(&self, invitation_id: &InvitationId) -> GatewayResult<()>;

    async fn call_procedure(
        &self,
        procedure: Procedure,
        args: &ProcedureArgs,
    ) -> GatewayResult<ProcedureResult>;

    async fn fetch_settings(&self, user_id: &UserId) -> GatewayResult<Option<UserSettings>>;

    async fn save_settings(
        &self,
        user_id: &UserId,
        settings: &UserSettings,
    ) -> GatewayResult<UserSettings>;

    /// Open a change feed for rows matching `filter`
    async fn subscribe(&self, filter: ChangeFilter) -> GatewayResult<ChangeStream>;
}
