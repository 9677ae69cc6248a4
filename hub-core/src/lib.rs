//! Hub membership and invitations
//!
//! Client-side core for shared hubs: the signed-in identity's hubs, the
//! current hub's members and pending invitations, received invitations,
//! realtime refresh and a staged settings draft, all over an injected
//! [`core_hub::RemoteGateway`].

pub mod config;
pub mod core_hub;
pub mod logging;
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_hub::{
    HubContext, HubDirectory, HubError, HubId, HubInvitation, HubMember, HubPermissions,
    HubResult, HubRole, RealtimeBridge, RemoteGateway, SessionStore, SettingsStore,
};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
