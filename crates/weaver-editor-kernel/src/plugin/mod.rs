//! Plugin lifecycle management.
//!
//! # Lifecycle
//!
//! ```text
//! Unregistered → Initializing → Active ⇄ Disabled → Destroyed
//!                      │                              ↑
//!                      └────────── init failed ───────┘
//! ```
//!
//! Plugins are isolated from each other: one plugin failing to initialise
//! or to tear down is logged and never stops the others.

mod context;
mod manifest;

pub use context::{PluginBus, PluginContext};
pub(crate) use context::{OwnedSubscriptions, PluginHost};
pub use manifest::{ANY_TOPIC, Capability, PluginManifest};

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::events::{Payload, Topic};

/// Plugin identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(SmolStr);

impl PluginId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Plugin lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PluginState {
    #[default]
    Unregistered,
    Initializing,
    Active,
    Disabled,
    /// Terminal.
    Destroyed,
}

impl PluginState {
    /// Whether `self → to` is a legal lifecycle step.
    pub fn can_transition(self, to: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, to),
            (Unregistered, Initializing)
                | (Initializing, Active)
                | (Initializing, Destroyed)
                | (Active, Disabled)
                | (Disabled, Active)
                | (Active, Destroyed)
                | (Disabled, Destroyed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Destroyed
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unregistered => "UNREGISTERED",
            Self::Initializing => "INITIALIZING",
            Self::Active => "ACTIVE",
            Self::Disabled => "DISABLED",
            Self::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// A lifecycle-managed behaviour extension.
///
/// Plugins register everything (subscriptions, commands, keybindings)
/// through the [`PluginContext`] passed to [`init`](Self::init). The
/// manager revokes all of it when the plugin is destroyed, so `destroy`
/// only needs to release resources the plugin holds itself.
pub trait Plugin: Send {
    fn manifest(&self) -> PluginManifest;

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError>;

    fn on_enable(&mut self) {}

    fn on_disable(&mut self) {}

    fn destroy(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

struct PluginEntry {
    manifest: PluginManifest,
    state: PluginState,
    plugin: Box<dyn Plugin>,
    subscriptions: OwnedSubscriptions,
}

impl PluginEntry {
    fn id(&self) -> &PluginId {
        &self.manifest.id
    }

    fn invalid(&self, to: PluginState) -> PluginError {
        PluginError::InvalidState {
            id: self.id().clone(),
            from: self.state,
            to,
        }
    }

    /// Revoke registrations, run the plugin's own `destroy`, mark destroyed.
    fn teardown(&mut self, host: &mut PluginHost<'_>) -> Result<(), PluginError> {
        let id = self.id().clone();
        host.revoke(&id, &self.subscriptions);
        let result = match catch_unwind(AssertUnwindSafe(|| self.plugin.destroy())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(PluginError::Destroy {
                id: id.clone(),
                reason: err.to_string(),
            }),
            Err(_) => Err(PluginError::Destroy {
                id: id.clone(),
                reason: "destroy panicked".into(),
            }),
        };
        self.state = PluginState::Destroyed;
        if let Err(err) = &result {
            warn!(plugin = %id, error = %err, "plugin teardown failed, continuing");
        }
        host.bus.emit(Topic::PLUGIN_DESTROYED, Payload::Plugin(id));
        result
    }
}

/// Registry and state machine for the plugin set.
///
/// Keeps plugins in registration order; teardown runs in reverse.
#[derive(Default)]
pub struct PluginManager {
    entries: Vec<PluginEntry>,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.id(), e.state)))
            .finish()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: &PluginId) -> Option<usize> {
        self.entries.iter().position(|e| e.id() == id)
    }

    pub fn state(&self, id: &PluginId) -> PluginState {
        self.position(id)
            .map(|i| self.entries[i].state)
            .unwrap_or_default()
    }

    pub fn is_active(&self, id: &PluginId) -> bool {
        self.state(id) == PluginState::Active
    }

    pub fn manifest(&self, id: &PluginId) -> Option<&PluginManifest> {
        self.position(id).map(|i| &self.entries[i].manifest)
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &PluginId> {
        self.entries.iter().map(PluginEntry::id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate, initialise and activate `plugin`.
    ///
    /// Registering an id that is already present logs a warning and does
    /// nothing. A plugin whose `init` fails is torn down, left DESTROYED,
    /// and the failure is returned.
    pub(crate) fn register(
        &mut self,
        mut plugin: Box<dyn Plugin>,
        host: &mut PluginHost<'_>,
    ) -> Result<PluginId, PluginError> {
        let manifest = match catch_unwind(AssertUnwindSafe(|| plugin.manifest())) {
            Ok(manifest) => manifest,
            Err(_) => {
                warn!("plugin manifest panicked, rejecting plugin");
                return Err(PluginError::InvalidManifest("manifest panicked".into()));
            }
        };
        manifest.validate()?;
        let id = manifest.id.clone();

        if let Some(i) = self.position(&id) {
            if !self.entries[i].state.is_terminal() {
                warn!(plugin = %id, state = %self.entries[i].state, "plugin already registered, ignoring");
                return Ok(id);
            }
            // A destroyed entry is only kept for inspection; a fresh
            // registration replaces it.
            self.entries.remove(i);
        }

        debug!(plugin = %id, version = %manifest.version, "initialising plugin");
        let subscriptions = OwnedSubscriptions::default();
        let init = {
            let mut ctx = PluginContext::new(host, &manifest, &subscriptions);
            catch_unwind(AssertUnwindSafe(|| plugin.init(&mut ctx)))
        };

        let mut entry = PluginEntry {
            manifest,
            state: PluginState::Initializing,
            plugin,
            subscriptions,
        };

        let failure = match init {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some("init panicked".to_string()),
        };

        if let Some(reason) = failure {
            warn!(plugin = %id, %reason, "plugin init failed, isolating");
            // Teardown errors are already logged; the init failure is what matters.
            let _ = entry.teardown(host);
            self.entries.push(entry);
            return Err(PluginError::Init { id, reason });
        }

        entry.state = PluginState::Active;
        self.entries.push(entry);
        info!(plugin = %id, "plugin active");
        host.bus.emit(Topic::PLUGIN_REGISTERED, Payload::Plugin(id.clone()));
        Ok(id)
    }

    /// DISABLED → ACTIVE.
    pub(crate) fn enable(&mut self, id: &PluginId) -> Result<(), PluginError> {
        let entry = self.entry_for(id, PluginState::Active)?;
        if entry.state != PluginState::Disabled {
            return Err(entry.invalid(PluginState::Active));
        }
        entry.subscriptions.resume();
        entry.state = PluginState::Active;
        entry.plugin.on_enable();
        debug!(plugin = %id, "plugin enabled");
        Ok(())
    }

    /// ACTIVE → DISABLED. Subscriptions pause; commands and keybindings hide.
    pub(crate) fn disable(&mut self, id: &PluginId) -> Result<(), PluginError> {
        let entry = self.entry_for(id, PluginState::Disabled)?;
        if entry.state != PluginState::Active {
            return Err(entry.invalid(PluginState::Disabled));
        }
        entry.subscriptions.pause();
        entry.state = PluginState::Disabled;
        entry.plugin.on_disable();
        debug!(plugin = %id, "plugin disabled");
        Ok(())
    }

    /// Destroy one plugin and forget it.
    ///
    /// Teardown failures are logged; the plugin is removed regardless.
    pub(crate) fn unregister(&mut self, id: &PluginId, host: &mut PluginHost<'_>) -> Result<(), PluginError> {
        let entry = self.entry_for(id, PluginState::Destroyed)?;
        if !entry.state.can_transition(PluginState::Destroyed) {
            return Err(entry.invalid(PluginState::Destroyed));
        }
        let _ = entry.teardown(host);
        if let Some(i) = self.position(id) {
            self.entries.remove(i);
        }
        info!(plugin = %id, "plugin unregistered");
        Ok(())
    }

    /// Tear every plugin down, newest first. Returns the failures, which
    /// never stop the remaining teardowns. Entries stay, DESTROYED, for
    /// inspection.
    pub(crate) fn destroy_all(&mut self, host: &mut PluginHost<'_>) -> Vec<PluginError> {
        let mut failures = Vec::new();
        for entry in self.entries.iter_mut().rev() {
            if entry.state.is_terminal() {
                continue;
            }
            if let Err(err) = entry.teardown(host) {
                failures.push(err);
            }
        }
        failures
    }

    fn entry_for(&mut self, id: &PluginId, to: PluginState) -> Result<&mut PluginEntry, PluginError> {
        match self.position(id) {
            Some(i) => Ok(&mut self.entries[i]),
            None => Err(PluginError::InvalidState {
                id: id.clone(),
                from: PluginState::Unregistered,
                to,
            }),
        }
    }
}
