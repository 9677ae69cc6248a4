//! Hub data structures

use super::types::{HubId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest accepted hub name, in characters
pub const MAX_HUB_NAME_LEN: usize = 100;

/// A Hub is a shared household namespace owning members and invitations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    /// Unique identifier
    pub id: HubId,

    /// Human-readable name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Identity that created the hub (its owner)
    pub created_by: UserId,

    /// Free-form settings map
    #[serde(default)]
    pub settings: Map<String, Value>,

    /// When the hub was created
    pub created_at: Timestamp,

    /// Last time hub metadata was updated
    pub updated_at: Timestamp,
}

impl Hub {
    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &HubPatch) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(settings) = &patch.settings {
            self.settings = settings.clone();
        }
    }
}

/// Input for `create_hub`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewHub {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl NewHub {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update for `update_hub`.
///
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Map<String, Value>>,
}

impl HubPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.settings.is_none()
    }
}

/// Check a hub name before it reaches the backend.
pub fn validate_hub_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Hub name is required".to_string());
    }
    if trimmed.chars().count() > MAX_HUB_NAME_LEN {
        return Err(format!(
            "Hub name must be at most {} characters",
            MAX_HUB_NAME_LEN
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hub() -> Hub {
        Hub {
            id: HubId::new("hub-1"),
            name: "Jones Family".to_string(),
            description: Some("Our house".to_string()),
            created_by: UserId::new("alice"),
            settings: Map::new(),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(1),
        }
    }

    #[test]
    fn test_apply_patch() {
        let mut hub = sample_hub();
        let mut settings = Map::new();
        settings.insert("color".to_string(), Value::from("teal"));

        hub.apply(&HubPatch {
            name: Some("  Smith House ".to_string()),
            description: Some(None),
            settings: Some(settings.clone()),
        });

        assert_eq!(hub.name, "Smith House");
        assert_eq!(hub.description, None);
        assert_eq!(hub.settings, settings);
    }

    #[test]
    fn test_empty_patch_leaves_hub_untouched() {
        let mut hub = sample_hub();
        let patch = HubPatch::default();
        assert!(patch.is_empty());
        hub.apply(&patch);
        assert_eq!(hub, sample_hub());
    }

    #[test]
    fn test_validate_hub_name() {
        assert!(validate_hub_name("Jones Family").is_ok());
        assert!(validate_hub_name("").is_err());
        assert!(validate_hub_name("   ").is_err());
        assert!(validate_hub_name(&"x".repeat(MAX_HUB_NAME_LEN)).is_ok());
        assert!(validate_hub_name(&"x".repeat(MAX_HUB_NAME_LEN + 1)).is_err());
    }
}
