//! One signed-in session's worth of hub state
//!
//! `HubContext` wires a session store, hub directory, realtime bridge and
//! settings draft to one gateway and one local cache.

use super::cache::{FileCache, HubSelection, LocalCache, MemoryCache};
use super::directory::HubDirectory;
use super::error::HubResult;
use super::gateway::RemoteGateway;
use super::realtime::RealtimeBridge;
use super::session::{Identity, SessionStore};
use super::settings::SettingsStore;
use crate::config::Config;
use std::sync::Arc;
use tracing::{info, warn};

pub struct HubContext {
    session: Arc<SessionStore>,
    directory: Arc<HubDirectory>,
    bridge: Arc<RealtimeBridge>,
    settings: Arc<SettingsStore>,
}

impl HubContext {
    pub fn new(gateway: Arc<dyn RemoteGateway>, cache: Arc<dyn LocalCache>, config: &Config) -> Self {
        let session = Arc::new(SessionStore::new(Arc::clone(&gateway)));
        let selection = HubSelection::new(cache, config.session.current_hub_key.clone());
        let directory = Arc::new(HubDirectory::new(
            Arc::clone(&gateway),
            Arc::clone(&session),
            selection,
            &config.invitations,
        ));
        let bridge = Arc::new(RealtimeBridge::new(
            Arc::clone(&gateway),
            Arc::clone(&directory),
            config.realtime.clone(),
        ));
        let settings = Arc::new(SettingsStore::new(gateway, Arc::clone(&session)));

        Self {
            session,
            directory,
            bridge,
            settings,
        }
    }

    /// Build a context whose local cache is chosen by `session.cache_path`
    pub fn with_config(gateway: Arc<dyn RemoteGateway>, config: &Config) -> Self {
        let cache: Arc<dyn LocalCache> = match &config.session.cache_path {
            Some(path) => Arc::new(FileCache::new(path.clone())),
            None => Arc::new(MemoryCache::new()),
        };
        Self::new(gateway, cache, config)
    }

    /// Resolve the session and, if signed in, load hubs and settings and
    /// start following the current hub.
    ///
    /// Returns `None` when the gateway has no authenticated identity.
    pub async fn start(&self) -> HubResult<Option<Identity>> {
        let Some(identity) = self.session.restore().await? else {
            return Ok(None);
        };

        self.directory.initialize().await;
        if let Err(e) = self.settings.load().await {
            warn!(user_id = %identity.id, error = %e, "Failed to load settings");
        }
        self.bridge.follow();

        info!(user_id = %identity.id, "Hub context started");
        Ok(Some(identity))
    }

    /// Tear down realtime, forget cached hub state and sign out
    pub async fn sign_out(&self) -> HubResult<()> {
        self.bridge.unsubscribe_all().await;
        self.directory.reset().await;
        self.settings.clear().await;
        self.session.sign_out().await
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn directory(&self) -> &Arc<HubDirectory> {
        &self.directory
    }

    pub fn realtime(&self) -> &Arc<RealtimeBridge> {
        &self.bridge
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }
}
