//! `save` command plus edit-count driven autosave.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tracing::debug;

use super::BUILTIN_PRIORITY;
use crate::command::{Command, CommandOutcome};
use crate::config::AutosaveConfig;
use crate::error::{ExternalError, PluginError};
use crate::events::{Payload, Topic};
use crate::plugin::{Capability, Plugin, PluginContext, PluginManifest};
use crate::state::Action;

pub struct AutosavePlugin {
    config: AutosaveConfig,
}

impl AutosavePlugin {
    pub const ID: &'static str = "autosave";

    pub fn new(config: AutosaveConfig) -> Self {
        Self { config }
    }
}

impl Plugin for AutosavePlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(Self::ID, env!("CARGO_PKG_VERSION"))
            .with_description("Saves through the persistence service")
            .with_capability(Capability::Commands)
            .with_capability(Capability::Persistence)
            .with_capability(Capability::events([Topic::STATE_CHANGED.as_str()]))
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let persistence = ctx.persistence()?;

        let store = persistence.clone();
        ctx.register_command(
            Command::new("save", move |scope, _payload: Value| {
                let store = store
                    .clone()
                    .ok_or(ExternalError::Unavailable("persistence"))?;
                let snapshot = scope.snapshot();
                let revision = snapshot.revision;
                let sender = scope.sender();
                Ok(CommandOutcome::pending(async move {
                    store.save(snapshot).await?;
                    sender.dispatch(Action::MarkSaved { revision });
                    Ok(json!({ "revision": revision }))
                }))
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Save the document"),
        )?;

        let threshold = self.config.edit_threshold;
        if persistence.is_none() || threshold == 0 {
            debug!(threshold, "automatic saving off");
            return Ok(());
        }

        // Revision at which the last save was requested (or the document was clean).
        let baseline = Arc::new(AtomicU64::new(0));
        let sender = ctx.sender();
        ctx.subscribe(Topic::STATE_CHANGED, move |event| {
            let Payload::State { revision, dirty } = event.payload else {
                return Ok(());
            };
            if !dirty {
                baseline.store(revision, Ordering::Relaxed);
            } else if revision >= baseline.load(Ordering::Relaxed) + threshold {
                debug!(revision, "edit threshold reached, saving");
                baseline.store(revision, Ordering::Relaxed);
                sender.execute("save", Value::Null);
            }
            Ok(())
        })?;
        Ok(())
    }
}
