//! Fixtures for building signed-in users over one shared backend

use crate::config::Config;
use crate::core_hub::cache::{LocalCache, MemoryCache};
use crate::core_hub::context::HubContext;
use crate::core_hub::directory::HubDirectory;
use crate::core_hub::hub::{Hub, NewHub};
use crate::core_hub::invitation::{HubInvitation, InviteRequest};
use crate::core_hub::member::HubRole;
use crate::core_hub::memory::MemoryBackend;
use crate::core_hub::session::Identity;
use crate::core_hub::types::{HubId, Timestamp};
use std::sync::Arc;
use std::time::Duration;

/// A shared backend plus the configuration every user is started with
pub struct HubWorld {
    pub backend: Arc<MemoryBackend>,
    pub config: Config,
}

impl Default for HubWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl HubWorld {
    /// Realtime disabled so tests only see the reloads they trigger
    pub fn new() -> Self {
        let mut config = Config::default();
        config.realtime.enabled = false;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            backend: MemoryBackend::new(),
            config,
        }
    }

    /// Register `email` and start a context signed in as it
    pub async fn user(&self, email: &str) -> TestUser {
        let identity = self.backend.register_user(email, None).await;
        self.sign_in(identity, Arc::new(MemoryCache::new())).await
    }

    /// Start a context for an existing identity with the given local cache
    pub async fn sign_in(&self, identity: Identity, cache: Arc<MemoryCache>) -> TestUser {
        let context = HubContext::new(
            Arc::new(self.backend.client(&identity)),
            Arc::clone(&cache) as Arc<dyn LocalCache>,
            &self.config,
        );
        context
            .start()
            .await
            .expect("start hub context")
            .expect("identity resolved");
        TestUser {
            identity,
            cache,
            context,
        }
    }

    /// Owner with a freshly created hub, selected as current
    pub async fn owner_with_hub(&self, email: &str, hub_name: &str) -> (TestUser, Hub) {
        let owner = self.user(email).await;
        let hub = owner
            .directory()
            .create_hub(NewHub::named(hub_name))
            .await
            .expect("create hub");
        (owner, hub)
    }

    /// Invite `member` to `hub` as `role` and accept on their side
    pub async fn join(&self, inviter: &TestUser, member: &TestUser, hub: &HubId, role: HubRole) {
        let invitation = inviter
            .directory()
            .invite_member(hub, InviteRequest::new(member.identity.email.clone(), role))
            .await
            .expect("invite member");
        member
            .directory()
            .fetch_user_invitations()
            .await
            .expect("fetch invitations");
        member
            .directory()
            .accept_invitation(&invitation.id)
            .await
            .expect("accept invitation");
    }

    /// Invitation row that expired a minute ago
    pub async fn expired_invitation(
        &self,
        hub: &HubId,
        email: &str,
        invited_by: &TestUser,
    ) -> HubInvitation {
        self.backend
            .seed_invitation(
                hub,
                email,
                HubRole::Member,
                &invited_by.identity.id,
                Timestamp::now().before(Duration::from_secs(60)),
            )
            .await
    }
}

/// A signed-in user with its own context and local cache
pub struct TestUser {
    pub identity: Identity,
    pub cache: Arc<MemoryCache>,
    pub context: HubContext,
}

impl TestUser {
    pub fn directory(&self) -> &Arc<HubDirectory> {
        self.context.directory()
    }

    /// Start a new context for the same identity and cache, like an app restart
    pub async fn restart(&self, world: &HubWorld) -> TestUser {
        world
            .sign_in(self.identity.clone(), Arc::clone(&self.cache))
            .await
    }
}
