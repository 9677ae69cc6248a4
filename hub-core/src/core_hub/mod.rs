//! Hub membership and invitations
//!
//! Client-side state for hubs: which hubs the signed-in identity belongs to,
//! who else is in the current one, and which invitations are in flight.
//! All authority lives behind [`RemoteGateway`]; the stores here cache what
//! the gateway returns and re-fetch after every mutation.

pub mod cache;
pub mod context;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod invitation;
pub mod member;
pub mod memory;
pub mod permissions;
pub mod realtime;
pub mod session;
pub mod settings;
pub mod types;

pub use cache::{CacheError, FileCache, HubSelection, LocalCache, MemoryCache};
pub use context::HubContext;
pub use directory::{selectors, DirectoryState, HubDirectory};
pub use error::{GatewayError, HubError, HubResult, RejectCode};
pub use gateway::{
    ChangeEvent, ChangeFilter, ChangeKind, ChangeStream, HubMembership, Procedure, ProcedureArgs,
    ProcedureResult, RemoteGateway, Table,
};
pub use hub::{Hub, HubPatch, NewHub};
pub use invitation::{HubInvitation, InvitationStatus, InviteRequest, NewInvitation};
pub use member::{HubMember, HubRole};
pub use memory::{MemoryBackend, MemoryGateway, Operation};
pub use permissions::HubPermissions;
pub use realtime::RealtimeBridge;
pub use session::{Identity, SessionState, SessionStore, UserProfile};
pub use settings::{SettingsPatch, SettingsState, SettingsStore, Theme, UserSettings};
pub use types::{HubId, InvitationId, MemberId, Timestamp, UserId};
