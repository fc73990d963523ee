//! Heading outline, recomputed as the document changes.
//!
//! A heading is any node of type `heading`. Its level comes from the
//! numeric `level` attribute, clamped to 1..=6 (1 when absent).

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::{DocumentAst, NodeId};
use crate::command::{Command, CommandOutcome};
use crate::error::{CommandError, HandlerError, PluginError};
use crate::events::{Payload, Topic};
use crate::plugin::{Capability, Plugin, PluginContext, PluginManifest};

use super::BUILTIN_PRIORITY;

pub const HEADING_KIND: &str = "heading";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub id: NodeId,
    pub level: u8,
    pub title: String,
}

/// Headings of `ast` in document order.
pub fn outline(ast: &DocumentAst) -> Vec<OutlineEntry> {
    ast.descendants(ast.root_id())
        .into_iter()
        .filter(|node| node.kind == HEADING_KIND)
        .map(|node| OutlineEntry {
            id: node.id.clone(),
            level: node
                .attr("level")
                .and_then(Value::as_u64)
                .map_or(1, |l| l.clamp(1, 6) as u8),
            title: node.text.clone().unwrap_or_default(),
        })
        .collect()
}

#[derive(Default)]
pub struct OutlinePlugin {
    current: Arc<Mutex<Vec<OutlineEntry>>>,
}

impl OutlinePlugin {
    pub const ID: &'static str = "outline";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Plugin for OutlinePlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(Self::ID, env!("CARGO_PKG_VERSION"))
            .with_description("Tracks the document's heading structure")
            .with_capability(Capability::Commands)
            .with_capability(Capability::events([
                Topic::DOCUMENT_CHANGED.as_str(),
                Topic::OUTLINE_UPDATED.as_str(),
            ]))
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        let bus = ctx.bus()?;
        let current = Arc::clone(&self.current);
        ctx.subscribe(Topic::DOCUMENT_CHANGED, move |event| {
            let Payload::Document { ast, .. } = &event.payload else {
                return Ok(());
            };
            let next = outline(ast);
            {
                let mut current = current.lock().unwrap_or_else(|p| p.into_inner());
                if *current == next {
                    return Ok(());
                }
                current.clone_from(&next);
            }
            let json = serde_json::to_value(&next).map_err(|e| HandlerError(e.to_string()))?;
            bus.emit(Topic::OUTLINE_UPDATED, Payload::Json(json))
                .map_err(|e| HandlerError(e.to_string()))
        })?;

        ctx.register_command(
            Command::new("outline.generate", |scope, _| {
                let entries = outline(scope.document().ast());
                let json = serde_json::to_value(entries)
                    .map_err(|e| CommandError::Failed(e.to_string()))?;
                Ok(CommandOutcome::Done(json))
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Headings in document order"),
        )?;
        Ok(())
    }

    fn destroy(&mut self) -> Result<(), PluginError> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        Ok(())
    }
}
