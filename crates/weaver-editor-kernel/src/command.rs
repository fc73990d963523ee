//! Command registry and resolution.
//!
//! Several commands may share an id. [`CommandRegistry::resolve`] picks one
//! deterministically:
//! 1. drop candidates whose predicate rejects the context (or whose owning
//!    plugin is disabled),
//! 2. take the highest priority,
//! 3. on a tie, the one registered first.
//!
//! Resolution is synchronous. A handler that needs async work (persistence,
//! AI) returns [`CommandOutcome::Pending`] and the kernel awaits it without
//! holding the registry.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::document::DocumentModel;
use crate::error::CommandError;
use crate::kernel::{KernelAction, KernelSender};
use crate::plugin::PluginId;
use crate::services::DocumentSnapshot;
use crate::state::EditorState;
use crate::types::{AdapterKind, Selection};

/// Command identifier, e.g. `save` or `ai.rewrite`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(SmolStr);

impl CommandId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommandId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// What a command predicate gets to look at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandContext {
    /// Active editor type.
    pub editor: AdapterKind,
    /// Scene template, when the host has one.
    pub scene: Option<SmolStr>,
    pub selection: Option<Selection>,
}

impl CommandContext {
    pub fn new(editor: AdapterKind) -> Self {
        Self {
            editor,
            scene: None,
            selection: None,
        }
    }

    pub fn with_scene(mut self, scene: impl Into<SmolStr>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    pub fn with_selection(mut self, selection: Option<Selection>) -> Self {
        self.selection = selection;
        self
    }

    /// Context derived from the current editor state.
    pub fn from_state(state: &EditorState) -> Self {
        Self {
            editor: state.mode.clone(),
            scene: None,
            selection: state.selection.clone(),
        }
    }
}

/// Read access to the kernel while a handler runs, plus the queue for
/// follow-up mutations.
///
/// Mutations are not applied while the handler runs: they queue on the
/// kernel's dispatch channel and apply, in order, once it returns.
pub struct CommandScope<'a> {
    document: &'a DocumentModel,
    state: Arc<EditorState>,
    context: &'a CommandContext,
    sender: &'a KernelSender,
}

impl<'a> CommandScope<'a> {
    pub(crate) fn new(
        document: &'a DocumentModel,
        state: Arc<EditorState>,
        context: &'a CommandContext,
        sender: &'a KernelSender,
    ) -> Self {
        Self {
            document,
            state,
            context,
            sender,
        }
    }

    pub fn document(&self) -> &DocumentModel {
        self.document
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn context(&self) -> &CommandContext {
        self.context
    }

    /// Snapshot of the document for persistence.
    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot::capture(self.document, &self.state)
    }

    /// Queue an action for after the handler returns.
    pub fn dispatch(&self, action: impl Into<KernelAction>) {
        self.sender.dispatch(action);
    }

    /// Queue another command for after the handler returns.
    pub fn execute(&self, id: impl Into<CommandId>, payload: Value) {
        self.sender.execute(id, payload);
    }

    /// A sender for async work that outlives the handler.
    pub fn sender(&self) -> KernelSender {
        self.sender.clone()
    }
}

/// What a handler produced.
pub enum CommandOutcome {
    Done(Value),
    /// Async remainder; the kernel awaits it.
    Pending(BoxFuture<'static, Result<Value, CommandError>>),
}

impl CommandOutcome {
    pub fn done() -> Self {
        Self::Done(Value::Null)
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Done(value.into())
    }

    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, CommandError>> + Send + 'static,
    {
        Self::Pending(Box::pin(fut))
    }

    /// Wait for the result.
    pub async fn resolve(self) -> Result<Value, CommandError> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Pending(fut) => fut.await,
        }
    }
}

impl fmt::Debug for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done(v) => f.debug_tuple("Done").field(v).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Parse a command payload into a typed request.
pub fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, CommandError> {
    serde_json::from_value(payload).map_err(|e| CommandError::InvalidPayload(e.to_string()))
}

type Predicate = Arc<dyn Fn(&CommandContext) -> bool + Send + Sync>;
type Handler =
    Arc<dyn Fn(&CommandScope<'_>, Value) -> Result<CommandOutcome, CommandError> + Send + Sync>;

/// A named, context-gated operation.
#[derive(Clone)]
pub struct Command {
    pub id: CommandId,
    pub priority: i32,
    pub description: Option<String>,
    predicate: Option<Predicate>,
    handler: Handler,
    owner: Option<PluginId>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Always-applicable command with priority 0.
    pub fn new<F>(id: impl Into<CommandId>, handler: F) -> Self
    where
        F: Fn(&CommandScope<'_>, Value) -> Result<CommandOutcome, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            priority: 0,
            description: None,
            predicate: None,
            handler: Arc::new(handler),
            owner: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Only applicable when `predicate` accepts the context.
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&CommandContext) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Only applicable in the given editor mode.
    pub fn in_mode(self, mode: AdapterKind) -> Self {
        self.when(move |ctx| ctx.editor == mode)
    }

    pub(crate) fn owned_by(mut self, owner: PluginId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn owner(&self) -> Option<&PluginId> {
        self.owner.as_ref()
    }

    pub fn applies(&self, ctx: &CommandContext) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(ctx))
    }

    /// Run the handler. A panicking handler becomes [`CommandError::Failed`].
    pub fn invoke(&self, scope: &CommandScope<'_>, payload: Value) -> Result<CommandOutcome, CommandError> {
        match catch_unwind(AssertUnwindSafe(|| (self.handler)(scope, payload))) {
            Ok(result) => result,
            Err(_) => {
                warn!(command = %self.id, "command handler panicked");
                Err(CommandError::Failed(format!("handler for {} panicked", self.id)))
            }
        }
    }
}

/// Token identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

#[derive(Debug)]
struct Entry {
    registration: Registration,
    command: Command,
}

/// id → registered commands, in registration order.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<CommandId, Vec<Entry>>,
    next: u64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Command) -> Registration {
        let registration = Registration(self.next);
        self.next += 1;
        debug!(
            command = %command.id,
            priority = command.priority,
            owner = ?command.owner,
            "command registered"
        );
        self.commands
            .entry(command.id.clone())
            .or_default()
            .push(Entry {
                registration,
                command,
            });
        registration
    }

    pub fn unregister(&mut self, registration: Registration) -> bool {
        let mut found = false;
        self.commands.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.registration != registration);
            found |= entries.len() != before;
            !entries.is_empty()
        });
        found
    }

    /// Drop every command owned by `owner`. Returns how many went.
    pub fn unregister_owner(&mut self, owner: &PluginId) -> usize {
        let mut removed = 0;
        self.commands.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.command.owner.as_ref() != Some(owner));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Pick the command to run for `id` in `ctx`.
    pub fn resolve(
        &self,
        id: &CommandId,
        ctx: &CommandContext,
        owner_enabled: impl Fn(&PluginId) -> bool,
    ) -> Result<&Command, CommandError> {
        let entries = self
            .commands
            .get(id)
            .ok_or_else(|| CommandError::NotFound(id.clone()))?;

        let mut best: Option<&Command> = None;
        for entry in entries {
            let cmd = &entry.command;
            if !cmd.owner.as_ref().is_none_or(&owner_enabled) || !cmd.applies(ctx) {
                continue;
            }
            // Strictly greater: equal priority keeps the earlier registration.
            if best.is_none_or(|b| cmd.priority > b.priority) {
                best = Some(cmd);
            }
        }
        best.ok_or_else(|| CommandError::NotApplicable(id.clone()))
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.commands.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &CommandId> {
        self.commands.keys()
    }

    pub fn len(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}
