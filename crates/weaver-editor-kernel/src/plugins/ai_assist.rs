//! Commands that route AI requests to the configured backend.
//!
//! `ai.request` takes a full [`AiRequest`] payload. `ai.complete`,
//! `ai.rewrite` and `ai.summarize` fill in the `op` and, where it's
//! missing, take their input from the document. `ai.cancel` cancels every
//! request still in flight.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value, json};
use tracing::debug;

use super::BUILTIN_PRIORITY;
use crate::ast::{NodeId, NodePatch};
use crate::cancel::{CancellationReason, CancellationSource};
use crate::command::{Command, CommandOutcome, CommandScope};
use crate::document::DocumentAction;
use crate::error::{CommandError, ExternalError, PluginError};
use crate::plugin::{Capability, Plugin, PluginContext, PluginManifest};
use crate::services::{AiBackend, AiRequest, cancellable};

#[derive(Default)]
pub struct AiAssistPlugin {
    cancel: Arc<Mutex<CancellationSource>>,
}

impl AiAssistPlugin {
    pub const ID: &'static str = "ai-assist";

    pub fn new() -> Self {
        Self::default()
    }
}

fn lock(source: &Mutex<CancellationSource>) -> MutexGuard<'_, CancellationSource> {
    source.lock().unwrap_or_else(|p| p.into_inner())
}

/// Payload as an object with `op` set.
fn with_op(payload: Value, op: &str) -> Result<Map<String, Value>, CommandError> {
    let mut map = match payload {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(CommandError::InvalidPayload(format!(
                "expected an object, got {other}"
            )));
        }
    };
    map.insert("op".into(), Value::String(op.into()));
    Ok(map)
}

/// Send `request` and hand back the text, applying a rewrite to its target
/// node when asked.
fn dispatch_request(
    scope: &CommandScope<'_>,
    backend: &Option<Arc<dyn AiBackend>>,
    cancel: &Mutex<CancellationSource>,
    request: AiRequest,
) -> Result<CommandOutcome, CommandError> {
    let backend = backend
        .as_ref()
        .ok_or(ExternalError::Unavailable("ai backend"))?;
    let apply_to = match &request {
        AiRequest::Rewrite {
            target: Some(target),
            apply: true,
            ..
        } => {
            scope.document().get_node(target)?;
            Some(target.clone())
        }
        _ => None,
    };
    let token = lock(cancel).token();
    debug!(op = request.op(), "sending ai request");
    let fut = request.send(backend.as_ref());
    let sender = scope.sender();
    Ok(CommandOutcome::pending(async move {
        let text = cancellable(fut, token).await?;
        if let Some(target) = apply_to {
            sender.dispatch(DocumentAction::update(target, NodePatch::new().text(text.clone())));
        }
        Ok(Value::String(text))
    }))
}

impl Plugin for AiAssistPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(Self::ID, env!("CARGO_PKG_VERSION"))
            .with_description("Completion, rewrite and summary commands")
            .with_capability(Capability::Commands)
            .with_capability(Capability::Ai)
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let backend = ctx.ai()?;

        let (b, c) = (backend.clone(), Arc::clone(&self.cancel));
        ctx.register_command(
            Command::new("ai.request", move |scope, payload| {
                dispatch_request(scope, &b, &c, AiRequest::from_value(payload)?)
            })
            .with_priority(BUILTIN_PRIORITY),
        )?;

        let (b, c) = (backend.clone(), Arc::clone(&self.cancel));
        ctx.register_command(
            Command::new("ai.complete", move |scope, payload| {
                let mut map = with_op(payload, "completion")?;
                let context = map
                    .entry("context")
                    .or_insert_with(|| Value::String(scope.document().text()))
                    .as_str()
                    .map(|s| s.chars().count())
                    .unwrap_or_default();
                map.entry("cursor").or_insert_with(|| json!(context));
                dispatch_request(scope, &b, &c, AiRequest::from_value(Value::Object(map))?)
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Continue the text at the cursor"),
        )?;

        let (b, c) = (backend.clone(), Arc::clone(&self.cancel));
        ctx.register_command(
            Command::new("ai.rewrite", move |scope, payload| {
                let mut map = with_op(payload, "rewrite")?;
                if !map.contains_key("content") {
                    let target: Option<NodeId> = map.get("target").and_then(Value::as_str).map(Into::into);
                    let content = match target {
                        Some(id) => scope.document().get_node(&id)?.text.clone().unwrap_or_default(),
                        None => scope.document().text(),
                    };
                    map.insert("content".into(), Value::String(content));
                }
                dispatch_request(scope, &b, &c, AiRequest::from_value(Value::Object(map))?)
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Rewrite text in a given style"),
        )?;

        let (b, c) = (backend, Arc::clone(&self.cancel));
        ctx.register_command(
            Command::new("ai.summarize", move |scope, payload| {
                let mut map = with_op(payload, "summary")?;
                map.entry("content")
                    .or_insert_with(|| Value::String(scope.document().text()));
                dispatch_request(scope, &b, &c, AiRequest::from_value(Value::Object(map))?)
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Summarise the document"),
        )?;

        let c = Arc::clone(&self.cancel);
        ctx.register_command(
            Command::new("ai.cancel", move |_, _| {
                let mut source = lock(&c);
                let cancelled = source.cancel(CancellationReason::Requested);
                *source = CancellationSource::new();
                Ok(CommandOutcome::value(cancelled))
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Cancel AI requests in flight"),
        )?;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), PluginError> {
        lock(&self.cancel).cancel(CancellationReason::KernelDestroyed);
        Ok(())
    }
}
