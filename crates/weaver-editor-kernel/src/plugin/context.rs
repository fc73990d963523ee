//! What a plugin can reach during `init`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::PluginManifest;
use crate::command::{Command, CommandId, CommandRegistry, Registration};
use crate::error::PluginError;
use crate::events::{Event, EventBus, HandlerResult, Payload, Subscription, Topic};
use crate::input::{KeyBinding, KeyCombo, Keymap};
use crate::kernel::KernelSender;
use crate::plugin::PluginId;
use crate::services::{AiBackend, Persistence, Services};

/// Kernel components the plugin manager wires plugins into.
pub(crate) struct PluginHost<'a> {
    pub bus: &'a EventBus,
    pub commands: &'a mut CommandRegistry,
    pub keymap: &'a mut Keymap,
    pub services: &'a Services,
    pub sender: &'a KernelSender,
}

impl PluginHost<'_> {
    /// Drop everything `owner` put into the kernel.
    pub(crate) fn revoke(&mut self, owner: &PluginId, subscriptions: &OwnedSubscriptions) {
        let subscriptions = subscriptions.revoke();
        let commands = self.commands.unregister_owner(owner);
        let keys = self.keymap.unbind_owner(owner);
        tracing::debug!(plugin = %owner, subscriptions, commands, keys, "revoked plugin registrations");
    }
}

/// Event subscriptions owned by one plugin.
///
/// Shared between the plugin's entry and every [`PluginBus`] it holds, so
/// subscriptions made after `init` are paused and revoked with the rest.
/// Once revoked, anything subscribed later is unsubscribed straight away.
#[derive(Debug, Clone, Default)]
pub(crate) struct OwnedSubscriptions {
    inner: Arc<Mutex<OwnedInner>>,
}

#[derive(Debug, Default)]
struct OwnedInner {
    subscriptions: Vec<Subscription>,
    paused: bool,
    revoked: bool,
}

impl OwnedSubscriptions {
    fn lock(&self) -> MutexGuard<'_, OwnedInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push(&self, sub: Subscription) {
        let mut inner = self.lock();
        if inner.revoked {
            sub.unsubscribe();
            return;
        }
        if inner.paused {
            sub.pause();
        }
        inner.subscriptions.push(sub);
    }

    pub(crate) fn pause(&self) {
        let mut inner = self.lock();
        inner.paused = true;
        for sub in &inner.subscriptions {
            sub.pause();
        }
    }

    pub(crate) fn resume(&self) {
        let mut inner = self.lock();
        inner.paused = false;
        for sub in &inner.subscriptions {
            sub.resume();
        }
    }

    /// Unsubscribe everything. Returns how many were live.
    pub(crate) fn revoke(&self) -> usize {
        let mut inner = self.lock();
        inner.revoked = true;
        let count = inner.subscriptions.len();
        for sub in inner.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        count
    }
}

fn topic_denied(manifest: &PluginManifest, topic: &Topic) -> PluginError {
    PluginError::CapabilityDenied {
        id: manifest.id.clone(),
        capability: smol_str::format_smolstr!("events:{topic}"),
    }
}

/// Event bus access for handlers that run after `init`.
///
/// Topics are checked against the manifest on every call, and
/// subscriptions belong to the plugin like those made through
/// [`PluginContext::subscribe`].
#[derive(Clone)]
pub struct PluginBus {
    manifest: Arc<PluginManifest>,
    bus: EventBus,
    owned: OwnedSubscriptions,
}

impl fmt::Debug for PluginBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBus")
            .field("owner", &self.manifest.id)
            .finish_non_exhaustive()
    }
}

impl PluginBus {
    fn check(&self, topic: &Topic) -> Result<(), PluginError> {
        if self.manifest.allows_topic(topic) {
            Ok(())
        } else {
            Err(topic_denied(&self.manifest, topic))
        }
    }

    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Result<(), PluginError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let topic = topic.into();
        self.check(&topic)?;
        self.owned.push(self.bus.subscribe(topic, handler));
        Ok(())
    }

    pub fn emit(&self, topic: impl Into<Topic>, payload: Payload) -> Result<(), PluginError> {
        let topic = topic.into();
        self.check(&topic)?;
        self.bus.emit(topic, payload);
        Ok(())
    }
}

/// Capability-checked access to the kernel, handed to [`Plugin::init`](super::Plugin::init).
///
/// Everything registered through the context is owned by the plugin and
/// revoked when it is destroyed.
pub struct PluginContext<'a> {
    manifest: &'a PluginManifest,
    bus: &'a EventBus,
    commands: &'a mut CommandRegistry,
    keymap: &'a mut Keymap,
    services: &'a Services,
    sender: &'a KernelSender,
    subscriptions: &'a OwnedSubscriptions,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(
        host: &'a mut PluginHost<'_>,
        manifest: &'a PluginManifest,
        subscriptions: &'a OwnedSubscriptions,
    ) -> Self {
        Self {
            manifest,
            bus: host.bus,
            commands: &mut *host.commands,
            keymap: &mut *host.keymap,
            services: host.services,
            sender: host.sender,
            subscriptions,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.manifest.id
    }

    fn require(&self, kind: &'static str) -> Result<(), PluginError> {
        if self.manifest.declares(kind) {
            Ok(())
        } else {
            Err(self.denied(kind))
        }
    }

    fn denied(&self, capability: impl Into<smol_str::SmolStr>) -> PluginError {
        PluginError::CapabilityDenied {
            id: self.manifest.id.clone(),
            capability: capability.into(),
        }
    }

    fn require_topic(&self, topic: &Topic) -> Result<(), PluginError> {
        if self.manifest.allows_topic(topic) {
            Ok(())
        } else {
            Err(topic_denied(self.manifest, topic))
        }
    }

    /// Subscribe to a declared topic.
    pub fn subscribe<F>(&mut self, topic: impl Into<Topic>, handler: F) -> Result<(), PluginError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let topic = topic.into();
        self.require_topic(&topic)?;
        self.subscriptions.push(self.bus.subscribe(topic, handler));
        Ok(())
    }

    /// Emit on a declared topic.
    pub fn emit(&self, topic: impl Into<Topic>, payload: Payload) -> Result<(), PluginError> {
        let topic = topic.into();
        self.require_topic(&topic)?;
        self.bus.emit(topic, payload);
        Ok(())
    }

    /// A bus handle for handlers that emit or subscribe later.
    pub fn bus(&self) -> Result<PluginBus, PluginError> {
        self.require("events")?;
        Ok(PluginBus {
            manifest: Arc::new(self.manifest.clone()),
            bus: self.bus.clone(),
            owned: self.subscriptions.clone(),
        })
    }

    pub fn register_command(&mut self, command: Command) -> Result<Registration, PluginError> {
        self.require("commands")?;
        Ok(self
            .commands
            .register(command.owned_by(self.manifest.id.clone())))
    }

    pub fn bind_key(
        &mut self,
        combo: KeyCombo,
        command: impl Into<CommandId>,
        payload: Value,
    ) -> Result<(), PluginError> {
        self.require("keybindings")?;
        self.keymap.bind(KeyBinding {
            combo,
            command: command.into(),
            payload,
            owner: Some(self.manifest.id.clone()),
        });
        Ok(())
    }

    /// The persistence collaborator, if the host configured one.
    pub fn persistence(&self) -> Result<Option<Arc<dyn Persistence>>, PluginError> {
        self.require("persistence")?;
        Ok(self.services.persistence.clone())
    }

    /// The AI backend, if the host configured one.
    pub fn ai(&self) -> Result<Option<Arc<dyn AiBackend>>, PluginError> {
        self.require("ai")?;
        Ok(self.services.ai.clone())
    }

    /// Channel for queueing kernel actions and commands.
    pub fn sender(&self) -> KernelSender {
        self.sender.clone()
    }
}
