//! Kernel configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::Path;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::DEFAULT_MAX_QUEUED_EVENTS;
use crate::types::AdapterKind;

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(code(kernel::config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid kernel config")]
    #[diagnostic(code(kernel::config::parse), help("every field is optional; see KernelConfig"))]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Adapter mounted by `init` when the caller doesn't name one.
    pub default_adapter: AdapterKind,
    /// Bound on events queued behind a delivery in progress.
    pub max_queued_events: usize,
    /// Undo depth. 0 disables history.
    pub history_limit: usize,
    pub plugins: PluginsConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_adapter: AdapterKind::default(),
            max_queued_events: DEFAULT_MAX_QUEUED_EVENTS,
            history_limit: 100,
            plugins: PluginsConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

/// Which default plugins `init` installs. `None`/`false` leaves one out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub autosave: Option<AutosaveConfig>,
    pub shortcuts: Option<ShortcutsConfig>,
    pub outline: bool,
    pub ai_assist: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            autosave: Some(AutosaveConfig::default()),
            shortcuts: Some(ShortcutsConfig::default()),
            outline: true,
            ai_assist: true,
        }
    }
}

impl PluginsConfig {
    /// No default plugins at all.
    pub fn none() -> Self {
        Self {
            autosave: None,
            shortcuts: None,
            outline: false,
            ai_assist: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Content revisions since the last save before autosave fires.
    /// 0 turns automatic saving off; the `save` command still works.
    pub edit_threshold: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { edit_threshold: 20 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortcutsConfig {
    /// Use Cmd instead of Ctrl as the primary modifier.
    pub mac: bool,
    /// Extra `"Ctrl+K" → command id` bindings.
    pub bindings: Vec<(String, String)>,
}

impl Default for ShortcutsConfig {
    fn default() -> Self {
        Self {
            mac: cfg!(target_os = "macos"),
            bindings: Vec::new(),
        }
    }
}
