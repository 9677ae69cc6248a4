//! User settings with a staged draft
//!
//! Edits land in a draft that is distinct from the confirmed copy. `commit`
//! persists the draft; a failed commit reverts the draft to the confirmed
//! settings.

use super::error::{HubError, HubResult};
use super::gateway::RemoteGateway;
use super::session::SessionStore;
use super::types::{HubId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Row of `user_settings`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub theme: Theme,
    pub language: String,
    pub timezone: String,
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub default_hub_id: Option<HubId>,
    pub updated_at: Option<Timestamp>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            email_notifications: true,
            push_notifications: false,
            default_hub_id: None,
            updated_at: None,
        }
    }
}

/// Partial settings change applied to the draft
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub theme: Option<Theme>,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
    pub default_hub_id: Option<Option<HubId>>,
}

impl UserSettings {
    fn apply(&mut self, patch: SettingsPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(language) = patch.language {
            self.language = language;
        }
        if let Some(timezone) = patch.timezone {
            self.timezone = timezone;
        }
        if let Some(enabled) = patch.email_notifications {
            self.email_notifications = enabled;
        }
        if let Some(enabled) = patch.push_notifications {
            self.push_notifications = enabled;
        }
        if let Some(hub) = patch.default_hub_id {
            self.default_hub_id = hub;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsState {
    /// Last settings the backend acknowledged
    pub confirmed: UserSettings,
    /// Locally staged settings
    pub draft: UserSettings,
    pub has_unsaved_changes: bool,
    pub is_loaded: bool,
    pub is_saving: bool,
    pub error: Option<String>,
}

pub struct SettingsStore {
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionStore>,
    state: RwLock<SettingsState>,
}

impl SettingsStore {
    pub fn new(gateway: Arc<dyn RemoteGateway>, session: Arc<SessionStore>) -> Self {
        Self {
            gateway,
            session,
            state: RwLock::new(SettingsState::default()),
        }
    }

    pub async fn state(&self) -> SettingsState {
        self.state.read().await.clone()
    }

    /// Fetch the identity's settings, falling back to defaults when no row
    /// exists yet. Discards any staged draft.
    pub async fn load(&self) -> HubResult<UserSettings> {
        let identity = self.session.require_identity()?;
        let result = self.gateway.fetch_settings(&identity.id).await;

        let mut state = self.state.write().await;
        match result {
            Ok(settings) => {
                let settings = settings.unwrap_or_default();
                state.confirmed = settings.clone();
                state.draft = settings.clone();
                state.has_unsaved_changes = false;
                state.is_loaded = true;
                state.error = None;
                Ok(settings)
            }
            Err(e) => {
                let err = HubError::from(e);
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Apply `patch` to the draft only
    pub async fn stage(&self, patch: SettingsPatch) -> UserSettings {
        let mut state = self.state.write().await;
        state.draft.apply(patch);
        state.has_unsaved_changes = state.draft != state.confirmed;
        state.draft.clone()
    }

    /// Persist the draft. On failure the draft reverts to the confirmed copy.
    pub async fn commit(&self) -> HubResult<UserSettings> {
        let identity = self.session.require_identity()?;
        let draft = {
            let mut state = self.state.write().await;
            if !state.has_unsaved_changes {
                return Ok(state.confirmed.clone());
            }
            state.is_saving = true;
            state.error = None;
            state.draft.clone()
        };

        let result = self.gateway.save_settings(&identity.id, &draft).await;

        let mut state = self.state.write().await;
        state.is_saving = false;
        match result {
            Ok(saved) => {
                info!(user_id = %identity.id, "Settings saved");
                state.confirmed = saved.clone();
                state.draft = saved.clone();
                state.has_unsaved_changes = false;
                Ok(saved)
            }
            Err(e) => {
                let err = HubError::from(e);
                warn!(user_id = %identity.id, error = %err, "Settings save failed, reverting draft");
                state.draft = state.confirmed.clone();
                state.has_unsaved_changes = false;
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Drop staged changes
    pub async fn discard(&self) {
        let mut state = self.state.write().await;
        state.draft = state.confirmed.clone();
        state.has_unsaved_changes = false;
    }

    /// Forget everything; used on sign-out
    pub async fn clear(&self) {
        *self.state.write().await = SettingsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_hub::memory::{MemoryBackend, Operation};

    async fn store() -> (Arc<MemoryBackend>, SettingsStore) {
        let backend = MemoryBackend::new();
        let alice = backend.register_user("alice@example.com", None).await;
        let gateway: Arc<dyn RemoteGateway> = Arc::new(backend.client(&alice));
        let session = Arc::new(SessionStore::new(gateway.clone()));
        session.restore().await.unwrap();
        (backend, SettingsStore::new(gateway, session))
    }

    #[tokio::test]
    async fn test_load_defaults_when_missing() {
        let (_backend, store) = store().await;
        let settings = store.load().await.unwrap();
        assert_eq!(settings, UserSettings::default());
        assert!(store.state().await.is_loaded);
    }

    #[tokio::test]
    async fn test_stage_does_not_touch_confirmed() {
        let (_backend, store) = store().await;
        store.load().await.unwrap();

        store
            .stage(SettingsPatch {
                theme: Some(Theme::Dark),
                ..Default::default()
            })
            .await;

        let state = store.state().await;
        assert!(state.has_unsaved_changes);
        assert_eq!(state.draft.theme, Theme::Dark);
        assert_eq!(state.confirmed.theme, Theme::System);
    }

    #[tokio::test]
    async fn test_staging_back_to_confirmed_clears_flag() {
        let (_backend, store) = store().await;
        store.load().await.unwrap();

        store.stage(SettingsPatch { push_notifications: Some(true), ..Default::default() }).await;
        store.stage(SettingsPatch { push_notifications: Some(false), ..Default::default() }).await;

        assert!(!store.state().await.has_unsaved_changes);
    }

    #[tokio::test]
    async fn test_commit_persists_draft() {
        let (_backend, store) = store().await;
        store.load().await.unwrap();
        store
            .stage(SettingsPatch {
                language: Some("fr".to_string()),
                ..Default::default()
            })
            .await;

        let saved = store.commit().await.unwrap();
        assert_eq!(saved.language, "fr");
        assert!(saved.updated_at.is_some());

        let state = store.state().await;
        assert!(!state.has_unsaved_changes);
        assert_eq!(state.confirmed, state.draft);

        // A fresh load sees the committed value
        assert_eq!(store.load().await.unwrap().language, "fr");
    }

    #[tokio::test]
    async fn test_failed_commit_reverts_draft() {
        let (backend, store) = store().await;
        store.load().await.unwrap();
        store
            .stage(SettingsPatch {
                theme: Some(Theme::Light),
                ..Default::default()
            })
            .await;

        backend.fail_next(Operation::SaveSettings).await;
        let result = store.commit().await;
        assert!(matches!(result, Err(HubError::Unexpected(_))));

        let state = store.state().await;
        assert_eq!(state.draft.theme, Theme::System);
        assert!(!state.has_unsaved_changes);
        assert!(!state.is_saving);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_commit_without_changes_is_a_no_op() {
        let (backend, store) = store().await;
        store.load().await.unwrap();
        backend.fail_next(Operation::SaveSettings).await;

        assert!(store.commit().await.is_ok());
    }
}
