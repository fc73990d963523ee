//! Plugin manifests and capability declarations.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::PluginId;
use crate::error::PluginError;
use crate::events::Topic;

/// Topic name in an events capability that matches every topic.
pub const ANY_TOPIC: &str = "*";

/// Something a plugin is allowed to do. Declared up front in the manifest
/// and checked by [`PluginContext`](super::PluginContext) on every use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    /// Register commands.
    Commands,
    /// Bind key combinations.
    Keybindings,
    /// Subscribe to and emit on these topics.
    Events { topics: Vec<SmolStr> },
    /// Call the AI backend.
    Ai,
    /// Call the persistence collaborator.
    Persistence,
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Commands => "commands",
            Self::Keybindings => "keybindings",
            Self::Events { .. } => "events",
            Self::Ai => "ai",
            Self::Persistence => "persistence",
        }
    }

    /// Events capability over the given topics.
    pub fn events<T: Into<SmolStr>>(topics: impl IntoIterator<Item = T>) -> Self {
        Self::Events {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }
}

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: PluginId,
    pub version: SmolStr,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PluginManifest {
    pub fn new(id: impl Into<PluginId>, version: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            capabilities: Vec::new(),
            description: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Checked once at registration.
    pub fn validate(&self) -> Result<(), PluginError> {
        let id = self.id.as_str();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(PluginError::InvalidManifest(format!(
                "plugin id {id:?} must be non-empty and contain no whitespace"
            )));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::InvalidManifest(format!(
                "plugin {id} has an empty version"
            )));
        }
        for (i, cap) in self.capabilities.iter().enumerate() {
            if self.capabilities[..i].iter().any(|c| c.kind() == cap.kind()) {
                return Err(PluginError::InvalidManifest(format!(
                    "plugin {id} declares {} more than once",
                    cap.kind()
                )));
            }
            if let Capability::Events { topics } = cap {
                if topics.iter().any(|t| t.is_empty()) {
                    return Err(PluginError::InvalidManifest(format!(
                        "plugin {id} declares an empty topic"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn declares(&self, kind: &str) -> bool {
        self.capabilities.iter().any(|c| c.kind() == kind)
    }

    pub fn allows_topic(&self, topic: &Topic) -> bool {
        self.capabilities.iter().any(|c| match c {
            Capability::Events { topics } => topics
                .iter()
                .any(|t| t == ANY_TOPIC || t == topic.as_str()),
            _ => false,
        })
    }
}
