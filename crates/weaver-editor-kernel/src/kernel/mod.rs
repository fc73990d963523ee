//! The editor kernel.
//!
//! [`EditorKernel`] owns every component and is the only writer of document
//! and editor state. Hosts call it directly; adapters, plugin handlers and
//! async command tails reach it through the [`KernelSender`] inbox, which is
//! drained in order after every kernel operation.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized → Initializing → Ready → Destroyed
//!                      │                    ↑
//!                      └──→ Error ──────────┘
//! ```
//!
//! `Error` can also go back to `Initializing` through another `init`.

mod builder;
pub(crate) mod inbox;

pub use builder::KernelBuilder;
pub use inbox::{KernelAction, KernelMessage, KernelSender};

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use futures_util::future::{BoxFuture, Either, select};
use serde_json::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::adapter::{AdapterHandle, AdapterRegistry, MountContext};
use crate::ast::{DocumentAst, SerializedNode};
use crate::cancel::CancellationToken;
use crate::command::{Command, CommandContext, CommandId, CommandOutcome, CommandRegistry, CommandScope, Registration};
use crate::config::KernelConfig;
use crate::document::{DocumentAction, DocumentChange, DocumentModel, execute_document_action};
use crate::error::{AdapterError, CommandError, ExternalError, KernelError};
use crate::events::{Event, EventBus, HandlerResult, Payload, Subscription, Topic};
use crate::input::{InputEvent, InputOutcome, KeyBinding, KeyCombo, Keymap, MouseAction};
use crate::plugin::{Plugin, PluginHost, PluginId, PluginManager, PluginState};
use crate::services::Services;
use crate::state::{Action, EditorState, StateStore};
use crate::types::{AdapterKind, ContentRef, MountPoint, Selection};
use inbox::Inbox;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type CommandFuture = BoxFuture<'static, Result<Value, CommandError>>;
type InFlight = (CommandId, CommandFuture);

/// Race a command's async part against `cancel`. Dropping the losing
/// future drops whatever request it was waiting on.
fn with_cancel(fut: CommandFuture, cancel: CancellationToken) -> CommandFuture {
    Box::pin(async move {
        let cancelled = Box::pin(async move { cancel.cancelled().await });
        match select(fut, cancelled).await {
            Either::Left((result, _)) => result,
            Either::Right((reason, _)) => Err(ExternalError::Cancelled(reason.to_string()).into()),
        }
    })
}

/// Borrow the pieces of a kernel the plugin manager wires plugins into.
macro_rules! plugin_host {
    ($kernel:expr) => {
        PluginHost {
            bus: &$kernel.bus,
            commands: &mut $kernel.commands,
            keymap: &mut $kernel.keymap,
            services: &$kernel.services,
            sender: &$kernel.sender,
        }
    };
}

/// Kernel sub-components, as named in init failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelComponent {
    DocumentModel,
    StateStore,
    EventBus,
    Adapter,
    Plugins,
    Persistence,
}

impl fmt::Display for KernelComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DocumentModel => "document model",
            Self::StateStore => "state store",
            Self::EventBus => "event bus",
            Self::Adapter => "adapter",
            Self::Plugins => "plugins",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KernelStatus {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    /// Init failed in `component`; everything built so far was torn down.
    Error {
        component: KernelComponent,
        message: String,
    },
    /// Terminal.
    Destroyed,
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("UNINITIALIZED"),
            Self::Initializing => f.write_str("INITIALIZING"),
            Self::Ready => f.write_str("READY"),
            Self::Error { component, message } => write!(f, "ERROR({component}: {message})"),
            Self::Destroyed => f.write_str("DESTROYED"),
        }
    }
}

/// Whether a view is currently attached.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewState {
    Mounted(AdapterKind),
    /// No live adapter: before init, or after a failed switch. The document
    /// and state stay intact and another switch recovers.
    #[default]
    Unmounted,
}

/// What `init` starts from.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Initial tree. Takes precedence over `content_ref`.
    pub document: Option<SerializedNode>,
    /// Load this document from persistence.
    pub content_ref: Option<ContentRef>,
    /// Passed through to the adapter factory.
    pub adapter_options: Value,
}

impl InitOptions {
    pub fn with_document(mut self, document: SerializedNode) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_content_ref(mut self, content_ref: impl Into<ContentRef>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }

    pub fn with_adapter_options(mut self, options: Value) -> Self {
        self.adapter_options = options;
        self
    }
}

struct InitFailure {
    component: KernelComponent,
    source: BoxError,
}

impl InitFailure {
    fn new(component: KernelComponent, source: impl Into<BoxError>) -> Self {
        Self {
            component,
            source: source.into(),
        }
    }
}

/// The orchestrator. See the module docs.
pub struct EditorKernel {
    config: KernelConfig,
    status: KernelStatus,
    document: DocumentModel,
    store: StateStore,
    bus: EventBus,
    adapters: AdapterRegistry,
    adapter: Option<AdapterHandle>,
    mount: MountPoint,
    commands: CommandRegistry,
    keymap: Keymap,
    plugins: PluginManager,
    services: Services,
    /// Host plugins from the builder, installed after the defaults.
    pending_plugins: Vec<Box<dyn Plugin>>,
    inbox: Inbox,
    sender: KernelSender,
    in_flight: Vec<InFlight>,
}

impl fmt::Debug for EditorKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorKernel")
            .field("status", &self.status)
            .field("view", &self.view_state())
            .field("plugins", &self.plugins)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl EditorKernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub(crate) fn from_parts(
        config: KernelConfig,
        adapters: AdapterRegistry,
        services: Services,
        pending_plugins: Vec<Box<dyn Plugin>>,
    ) -> Self {
        let inbox = Inbox::new();
        let sender = inbox.sender();
        let store = StateStore::new(EditorState::new(
            Arc::new(DocumentAst::new()),
            config.default_adapter.clone(),
        ));
        Self {
            bus: EventBus::with_queue_limit(config.max_queued_events),
            document: DocumentModel::new().with_history_limit(config.history_limit),
            config,
            status: KernelStatus::Uninitialized,
            store,
            adapters,
            adapter: None,
            mount: MountPoint::default(),
            commands: CommandRegistry::new(),
            keymap: Keymap::new(),
            plugins: PluginManager::new(),
            services,
            pending_plugins,
            inbox,
            sender,
            in_flight: Vec::new(),
        }
    }

    pub fn status(&self) -> &KernelStatus {
        &self.status
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn view_state(&self) -> ViewState {
        match &self.adapter {
            Some(handle) if !handle.is_destroyed() => ViewState::Mounted(handle.kind().clone()),
            _ => ViewState::Unmounted,
        }
    }

    fn ensure_ready(&self) -> Result<(), KernelError> {
        match &self.status {
            KernelStatus::Ready => Ok(()),
            KernelStatus::Destroyed => Err(KernelError::Destroyed),
            other => Err(KernelError::NotReady(other.clone())),
        }
    }

    fn ensure_live(&self) -> Result<(), KernelError> {
        if self.status == KernelStatus::Destroyed {
            return Err(KernelError::Destroyed);
        }
        Ok(())
    }

    // ---- lifecycle ----

    /// Build the document and state, mount the first adapter and start the
    /// plugins.
    ///
    /// `kind` defaults to the configured adapter. Plugins that fail to start
    /// are logged and left out; any other failure tears down what was built,
    /// leaves the kernel in [`KernelStatus::Error`] and returns
    /// [`KernelError::InitFailed`].
    #[instrument(skip_all, fields(mount = %mount.id))]
    pub async fn init(
        &mut self,
        mount: MountPoint,
        kind: Option<AdapterKind>,
        options: InitOptions,
    ) -> Result<(), KernelError> {
        match &self.status {
            KernelStatus::Destroyed => return Err(KernelError::Destroyed),
            KernelStatus::Uninitialized | KernelStatus::Error { .. } => {}
            _ => return Err(KernelError::AlreadyInitialized),
        }
        self.status = KernelStatus::Initializing;
        self.mount = mount;
        let kind = kind.unwrap_or_else(|| self.config.default_adapter.clone());
        info!(adapter = %kind, "initialising kernel");

        let document = match self.build_document(&options).await {
            Ok(document) => document,
            Err(failure) => return Err(self.fail_init(failure)),
        };
        self.document = document;
        self.store = StateStore::new(EditorState {
            content_ref: options.content_ref.clone(),
            ..EditorState::new(self.document.snapshot(), kind.clone())
        });

        if let Err(err) = self
            .mount_adapter(kind.clone(), options.adapter_options, CancellationToken::none())
            .await
        {
            return Err(self.fail_init(InitFailure::new(KernelComponent::Adapter, err)));
        }

        self.install_plugins();

        self.status = KernelStatus::Ready;
        info!(adapter = %kind, plugins = self.plugins.len(), "kernel ready");
        self.bus.emit(Topic::KERNEL_READY, Payload::None);
        self.run_until_idle().await;
        Ok(())
    }

    async fn build_document(&self, options: &InitOptions) -> Result<DocumentModel, InitFailure> {
        let model = if let Some(tree) = &options.document {
            DocumentModel::deserialize(tree)
                .map_err(|e| InitFailure::new(KernelComponent::DocumentModel, e))?
        } else if let Some(content_ref) = &options.content_ref {
            let persistence = self.services.persistence.clone().ok_or_else(|| {
                InitFailure::new(
                    KernelComponent::Persistence,
                    ExternalError::Unavailable("persistence"),
                )
            })?;
            let snapshot = persistence
                .load(content_ref)
                .await
                .map_err(|e| InitFailure::new(KernelComponent::Persistence, e))?;
            let ast = snapshot
                .to_ast()
                .map_err(|e| InitFailure::new(KernelComponent::DocumentModel, e))?;
            DocumentModel::from_ast(ast)
        } else {
            DocumentModel::new()
        };
        Ok(model.with_history_limit(self.config.history_limit))
    }

    fn install_plugins(&mut self) {
        let mut plugins = crate::plugins::defaults(&self.config.plugins);
        plugins.append(&mut self.pending_plugins);
        for plugin in plugins {
            let mut host = plugin_host!(self);
            if let Err(err) = self.plugins.register(plugin, &mut host) {
                warn!(error = %err, "plugin failed to start, continuing without it");
            }
        }
    }

    fn fail_init(&mut self, failure: InitFailure) -> KernelError {
        let InitFailure { component, source } = failure;
        error!(%component, error = %source, "kernel init failed, tearing down");

        let mut host = plugin_host!(self);
        for err in self.plugins.destroy_all(&mut host) {
            warn!(error = %err, "plugin teardown failed during init rollback");
        }
        if let Some(mut adapter) = self.adapter.take() {
            if let Err(err) = adapter.destroy() {
                warn!(error = %err, "adapter teardown failed during init rollback");
            }
        }
        self.in_flight.clear();
        while self.inbox.try_next().is_some() {}
        self.document.clear();
        self.store = StateStore::default();

        self.status = KernelStatus::Error {
            component,
            message: source.to_string(),
        };
        KernelError::InitFailed { component, source }
    }

    /// Tear everything down: plugins newest first, then the adapter, then
    /// the bus and the document.
    ///
    /// Failures along the way are logged and never stop the rest. Every
    /// operation afterwards fails with [`KernelError::Destroyed`].
    pub fn destroy(&mut self) -> Result<(), KernelError> {
        self.ensure_live()?;
        info!(status = %self.status, "destroying kernel");
        self.bus.emit(Topic::KERNEL_DESTROYING, Payload::None);

        let mut host = plugin_host!(self);
        let failures = self.plugins.destroy_all(&mut host);
        if !failures.is_empty() {
            warn!(count = failures.len(), "plugins failed to tear down cleanly");
        }

        if let Some(mut adapter) = self.adapter.take() {
            if let Err(err) = adapter.destroy() {
                warn!(adapter = %adapter.kind(), error = %err, "adapter teardown failed");
            }
        }

        // Dropping the futures cancels whatever they were waiting on.
        self.in_flight.clear();
        self.inbox.close();
        self.bus.close();
        self.commands.clear();
        self.keymap.clear();
        self.document.clear();
        self.status = KernelStatus::Destroyed;
        debug!("kernel destroyed");
        Ok(())
    }

    // ---- reads ----

    pub fn state(&self) -> Result<Arc<EditorState>, KernelError> {
        self.ensure_ready()?;
        Ok(self.store.state())
    }

    pub fn document(&self) -> Result<&DocumentModel, KernelError> {
        self.ensure_ready()?;
        Ok(&self.document)
    }

    /// A handle for pushing messages from outside the kernel.
    pub fn sender(&self) -> Result<KernelSender, KernelError> {
        self.ensure_live()?;
        Ok(self.sender.clone())
    }

    /// Subscribe to kernel events.
    ///
    /// Allowed before `init` so hosts can observe `kernel.ready`.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Result<Subscription, KernelError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.bus.subscribe(topic, handler))
    }

    fn context(&self) -> CommandContext {
        CommandContext::from_state(&self.store.state())
    }

    // ---- mutation ----

    /// Apply one action, then drain the inbox.
    ///
    /// Document actions go through the document model first; the resulting
    /// snapshot is committed to the state store, pushed to the adapter and
    /// announced on `document.changed` and `state.changed`. Returns false if
    /// nothing changed.
    pub fn dispatch(&mut self, action: impl Into<KernelAction>) -> Result<bool, KernelError> {
        self.ensure_ready()?;
        let changed = self.apply(action.into())?;
        self.pump();
        Ok(changed)
    }

    fn apply(&mut self, action: KernelAction) -> Result<bool, KernelError> {
        match action {
            KernelAction::Document(action) => self.apply_document(&action),
            KernelAction::State(action) => self.apply_state(action),
        }
    }

    fn apply_document(&mut self, action: &DocumentAction) -> Result<bool, KernelError> {
        let result = execute_document_action(&mut self.document, action);
        let changes = self.document.take_changes();
        if !result? {
            return Ok(false);
        }
        let ast = self.document.snapshot();
        self.commit_document(Action::DocumentChanged { ast: Arc::clone(&ast) }, ast, changes);
        Ok(true)
    }

    /// Store, view, then subscribers.
    fn commit_document(&mut self, action: Action, ast: Arc<DocumentAst>, changes: Vec<DocumentChange>) {
        let before = self.store.state();
        self.store.dispatch(&action);
        let after = self.store.state();
        self.sync_view(&ast, &changes);
        trace!(revision = after.revision, changes = changes.len(), "document committed");
        self.bus.emit(
            Topic::DOCUMENT_CHANGED,
            Payload::Document {
                revision: after.revision,
                ast,
                changes,
            },
        );
        self.state_changed(&before, &after);
    }

    fn apply_state(&mut self, action: Action) -> Result<bool, KernelError> {
        if matches!(
            action,
            Action::DocumentChanged { .. } | Action::Load { .. } | Action::SwitchMode { .. }
        ) {
            return Err(KernelError::ReservedAction(action.kind().into()));
        }
        let before = self.store.state();
        if !self.store.dispatch(&action) {
            return Ok(false);
        }
        let after = self.store.state();
        if let Action::MarkSaved { revision } = action {
            debug!(revision, "save acknowledged");
            self.bus.emit(Topic::DOCUMENT_SAVED, Payload::Saved { revision });
        }
        self.state_changed(&before, &after);
        Ok(true)
    }

    /// Push view-facing state to the adapter and announce the change.
    fn state_changed(&mut self, before: &EditorState, after: &EditorState) {
        let selection_moved = before.selection != after.selection;
        if let Some(adapter) = self.adapter.as_mut() {
            if selection_moved {
                if let Err(err) = adapter.set_selection(after.selection.as_ref()) {
                    warn!(adapter = %adapter.kind(), error = %err, "adapter rejected selection");
                }
            }
            if before.viewport != after.viewport {
                if let Err(err) = adapter.set_viewport(after.viewport) {
                    warn!(adapter = %adapter.kind(), error = %err, "adapter rejected viewport");
                }
            }
        }
        if selection_moved {
            self.bus.emit(Topic::SELECTION_CHANGED, Payload::Selection(after.selection.clone()));
        }
        self.bus.emit(
            Topic::STATE_CHANGED,
            Payload::State {
                revision: after.revision,
                dirty: after.dirty,
            },
        );
    }

    fn sync_view(&mut self, ast: &DocumentAst, changes: &[DocumentChange]) {
        let Some(adapter) = self.adapter.as_mut() else {
            return;
        };
        if let Err(err) = adapter.update(ast, changes) {
            warn!(adapter = %adapter.kind(), error = %err, "incremental update failed, re-rendering");
            if let Err(err) = adapter.render(ast) {
                error!(adapter = %adapter.kind(), error = %err, "adapter render failed");
            }
        }
    }

    /// Clear the dirty flag if `revision` is still current.
    pub fn acknowledge_saved(&mut self, revision: u64) -> Result<bool, KernelError> {
        self.dispatch(Action::MarkSaved { revision })
    }

    /// Replace the document with one from persistence. History is dropped
    /// and the dirty flag cleared.
    #[instrument(skip_all, fields(content_ref = %content_ref))]
    pub async fn load(&mut self, content_ref: ContentRef) -> Result<(), KernelError> {
        self.ensure_ready()?;
        let persistence = self
            .services
            .persistence
            .clone()
            .ok_or(ExternalError::Unavailable("persistence"))?;
        let snapshot = persistence.load(&content_ref).await?;
        let ast = snapshot.to_ast()?;
        // Anything queued before the load applies to the old document.
        self.pump();

        self.document.load(ast);
        let changes = self.document.take_changes();
        let ast = self.document.snapshot();
        self.commit_document(
            Action::Load {
                content_ref: Some(content_ref),
                ast: Arc::clone(&ast),
            },
            ast,
            changes,
        );
        info!("document loaded");
        self.run_until_idle().await;
        Ok(())
    }

    // ---- inbox ----

    /// Apply everything queued on the inbox, in order. Async command tails
    /// started from here are parked until [`settle`](Self::settle).
    fn pump(&mut self) {
        while let Some(message) = self.inbox.try_next() {
            self.handle(message);
        }
    }

    fn handle(&mut self, message: KernelMessage) {
        match message {
            KernelMessage::Dispatch(action) => {
                if let Err(err) = self.apply(action) {
                    warn!(error = %err, "queued action rejected");
                }
            }
            KernelMessage::Execute { id, payload } => {
                let ctx = self.context();
                self.start_queued(id, &ctx, payload);
            }
            KernelMessage::Input(event) => {
                if let Some(binding) = self.route_input(event) {
                    let ctx = self.context();
                    if self.resolves(&binding.command, &ctx) {
                        self.start_queued(binding.command, &ctx, binding.payload);
                    }
                }
            }
        }
    }

    /// Await a command's async part, applying inbox messages as they arrive
    /// so a queued `ai.cancel` or edit is not held up behind it.
    async fn drive(&mut self, fut: CommandFuture) -> Result<Value, CommandError> {
        let mut fut = fut;
        loop {
            let step = {
                let next = pin!(self.inbox.next());
                match select(fut, next).await {
                    Either::Left((result, _)) => Either::Left(result),
                    Either::Right(received) => Either::Right(received),
                }
            };
            match step {
                Either::Left(result) => return result,
                Either::Right((Some(message), pending)) => {
                    fut = pending;
                    self.handle(message);
                }
                Either::Right((None, pending)) => return pending.await,
            }
        }
    }

    fn start_queued(&mut self, id: CommandId, ctx: &CommandContext, payload: Value) {
        match self.invoke(&id, ctx, payload) {
            Ok(CommandOutcome::Done(_)) => {
                self.bus
                    .emit(Topic::COMMAND_EXECUTED, Payload::Command { id, error: None });
            }
            Ok(CommandOutcome::Pending(fut)) => self.in_flight.push((id, fut)),
            Err(err) => self.command_failed(id, &err),
        }
    }

    /// Drain the inbox and await parked async commands until both are empty.
    pub async fn settle(&mut self) -> Result<(), KernelError> {
        self.ensure_ready()?;
        self.run_until_idle().await;
        Ok(())
    }

    async fn run_until_idle(&mut self) {
        loop {
            self.pump();
            if self.in_flight.is_empty() {
                return;
            }
            for (id, fut) in std::mem::take(&mut self.in_flight) {
                let result = self.drive(fut).await;
                self.finish(id, &result);
                self.pump();
            }
        }
    }

    // ---- commands ----

    fn resolves(&self, id: &CommandId, ctx: &CommandContext) -> bool {
        let plugins = &self.plugins;
        self.commands
            .resolve(id, ctx, |owner| plugins.is_active(owner))
            .is_ok()
    }

    fn invoke(
        &self,
        id: &CommandId,
        ctx: &CommandContext,
        payload: Value,
    ) -> Result<CommandOutcome, CommandError> {
        let plugins = &self.plugins;
        let command = self
            .commands
            .resolve(id, ctx, |owner| plugins.is_active(owner))?;
        debug!(command = %id, priority = command.priority, owner = ?command.owner(), "running command");
        let scope = CommandScope::new(&self.document, self.store.state(), ctx, &self.sender);
        command.invoke(&scope, payload)
    }

    fn finish(&mut self, id: CommandId, result: &Result<Value, CommandError>) {
        match result {
            Ok(_) => self
                .bus
                .emit(Topic::COMMAND_EXECUTED, Payload::Command { id, error: None }),
            Err(err) => self.command_failed(id, err),
        }
    }

    fn command_failed(&mut self, id: CommandId, err: &CommandError) {
        warn!(command = %id, error = %err, "command failed");
        self.bus.emit(
            Topic::COMMAND_FAILED,
            Payload::Command {
                id,
                error: Some(err.to_string()),
            },
        );
    }

    /// Run a command in the context derived from the current state.
    pub async fn execute(&mut self, id: impl Into<CommandId>, payload: Value) -> Result<Value, KernelError> {
        self.ensure_ready()?;
        let ctx = self.context();
        self.execute_with_context(id, ctx, payload).await
    }

    /// Like [`execute`](Self::execute), but the command's async part is
    /// abandoned with [`ExternalError::Cancelled`] once `cancel` fires. A
    /// command that already finished is unaffected.
    pub async fn execute_with_cancel(
        &mut self,
        id: impl Into<CommandId>,
        payload: Value,
        cancel: CancellationToken,
    ) -> Result<Value, KernelError> {
        self.ensure_ready()?;
        let ctx = self.context();
        self.run_command(id.into(), ctx, payload, cancel).await
    }

    /// Resolve `id` against `ctx`, run it, and await any async remainder.
    ///
    /// Mutations the handler queued are applied before its async part is
    /// awaited. Messages arriving while it runs are applied as they come,
    /// and everything left is applied before this returns.
    pub async fn execute_with_context(
        &mut self,
        id: impl Into<CommandId>,
        ctx: CommandContext,
        payload: Value,
    ) -> Result<Value, KernelError> {
        self.ensure_ready()?;
        self.run_command(id.into(), ctx, payload, CancellationToken::none())
            .await
    }

    async fn run_command(
        &mut self,
        id: CommandId,
        ctx: CommandContext,
        payload: Value,
        cancel: CancellationToken,
    ) -> Result<Value, KernelError> {
        let outcome = match self.invoke(&id, &ctx, payload) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.command_failed(id, &err);
                self.pump();
                return Err(err.into());
            }
        };
        self.pump();
        let result = match outcome {
            CommandOutcome::Done(value) => Ok(value),
            CommandOutcome::Pending(fut) => self.drive(with_cancel(fut, cancel)).await,
        };
        self.finish(id, &result);
        self.run_until_idle().await;
        Ok(result?)
    }

    /// Register a host command. Host commands have no owner and stay until
    /// unregistered or the kernel is destroyed.
    pub fn register_command(&mut self, command: Command) -> Result<Registration, KernelError> {
        self.ensure_ready()?;
        Ok(self.commands.register(command))
    }

    pub fn unregister_command(&mut self, registration: Registration) -> Result<bool, KernelError> {
        self.ensure_ready()?;
        Ok(self.commands.unregister(registration))
    }

    pub fn commands(&self) -> Result<&CommandRegistry, KernelError> {
        self.ensure_ready()?;
        Ok(&self.commands)
    }

    pub fn bind_key(
        &mut self,
        combo: KeyCombo,
        command: impl Into<CommandId>,
        payload: Value,
    ) -> Result<(), KernelError> {
        self.ensure_ready()?;
        self.keymap.bind(KeyBinding {
            combo,
            command: command.into(),
            payload,
            owner: None,
        });
        Ok(())
    }

    // ---- input ----

    /// Publish an input event and run whatever it's bound to.
    pub async fn handle_input(&mut self, event: InputEvent) -> Result<InputOutcome, KernelError> {
        self.ensure_ready()?;
        let Some(binding) = self.route_input(event) else {
            self.pump();
            return Ok(InputOutcome::NotHandled);
        };
        let ctx = self.context();
        if !self.resolves(&binding.command, &ctx) {
            debug!(command = %binding.command, "bound command not applicable, passing through");
            self.pump();
            return Ok(InputOutcome::PassThrough);
        }
        let command = binding.command.clone();
        let result = self
            .execute_with_context(binding.command, ctx, binding.payload)
            .await?;
        Ok(InputOutcome::Handled { command, result })
    }

    /// Emit the input topic and find the binding, if any. A click on a
    /// document position places the caret there.
    fn route_input(&mut self, event: InputEvent) -> Option<KeyBinding> {
        match event {
            InputEvent::Key(combo) => {
                self.bus.emit(Topic::INPUT_KEY, Payload::Key(combo.clone()));
                let plugins = &self.plugins;
                self.keymap
                    .lookup(&combo, |owner| plugins.is_active(owner))
                    .cloned()
            }
            InputEvent::Mouse(mouse) => {
                let caret = match (&mouse.action, &mouse.target) {
                    (MouseAction::Click, Some(target)) => {
                        Some(Selection::caret(target.node.clone(), target.offset))
                    }
                    _ => None,
                };
                self.bus.emit(Topic::INPUT_MOUSE, Payload::Mouse(mouse));
                if let Some(selection) = caret {
                    let action = Action::SetSelection {
                        selection: Some(selection),
                    };
                    if let Err(err) = self.apply_state(action) {
                        warn!(error = %err, "click selection rejected");
                    }
                }
                None
            }
        }
    }

    // ---- adapters ----

    /// Replace the active adapter. See [`switch_adapter_with_cancel`](Self::switch_adapter_with_cancel).
    pub async fn switch_adapter(&mut self, kind: impl Into<AdapterKind>, options: Value) -> Result<(), KernelError> {
        self.switch_adapter_with_cancel(kind, options, CancellationToken::none())
            .await
    }

    /// Destroy the current adapter and mount `kind` over the same document
    /// and selection. The viewport starts fresh.
    ///
    /// If mounting fails or `cancel` fires, whatever the factory produced is
    /// destroyed, the view is left [`ViewState::Unmounted`] and the kernel
    /// stays READY. An unknown `kind` fails before the current adapter is
    /// touched.
    #[instrument(skip_all, fields(kind = tracing::field::Empty))]
    pub async fn switch_adapter_with_cancel(
        &mut self,
        kind: impl Into<AdapterKind>,
        options: Value,
        cancel: CancellationToken,
    ) -> Result<(), KernelError> {
        self.ensure_ready()?;
        let kind = kind.into();
        tracing::Span::current().record("kind", tracing::field::display(&kind));
        if !self.adapters.contains(&kind) {
            return Err(AdapterError::UnknownAdapter(kind).into());
        }
        // Selection reported by the outgoing adapter must land first.
        self.pump();

        if let Some(mut old) = self.adapter.take() {
            let old_kind = old.kind().clone();
            if let Err(err) = old.destroy() {
                warn!(adapter = %old_kind, error = %err, "outgoing adapter failed to tear down");
            }
            self.bus.emit(
                Topic::ADAPTER_UNMOUNTED,
                Payload::Adapter {
                    kind: old_kind,
                    reason: None,
                },
            );
        }

        match self.mount_adapter(kind.clone(), options, cancel).await {
            Ok(()) => {
                let before = self.store.state();
                self.store.dispatch(&Action::SwitchMode { mode: kind.clone() });
                let after = self.store.state();
                info!(adapter = %kind, "adapter switched");
                self.bus.emit(
                    Topic::ADAPTER_SWITCHED,
                    Payload::Adapter {
                        kind,
                        reason: None,
                    },
                );
                if !Arc::ptr_eq(&before, &after) {
                    self.state_changed(&before, &after);
                }
                self.run_until_idle().await;
                Ok(())
            }
            Err(err) => {
                warn!(adapter = %kind, error = %err, "adapter switch failed, view unmounted");
                self.bus.emit(
                    Topic::ADAPTER_UNMOUNTED,
                    Payload::Adapter {
                        kind,
                        reason: Some(err.to_string()),
                    },
                );
                self.pump();
                Err(err.into())
            }
        }
    }

    /// Create, render and install an adapter. Anything created but not
    /// installed is destroyed before returning.
    async fn mount_adapter(
        &mut self,
        kind: AdapterKind,
        options: Value,
        cancel: CancellationToken,
    ) -> Result<(), AdapterError> {
        let ctx = MountContext {
            kind: kind.clone(),
            mount: self.mount.clone(),
            options,
            sink: self.sender.clone(),
            cancel: cancel.clone(),
        };
        let created = self.adapters.create(ctx)?.await?;
        let mut handle = AdapterHandle::new(created);

        if let Some(reason) = cancel.reason() {
            info!(adapter = %kind, %reason, "mount cancelled, discarding adapter");
            if let Err(err) = handle.destroy() {
                warn!(adapter = %kind, error = %err, "cancelled adapter failed to tear down");
            }
            return Err(AdapterError::Cancelled(kind));
        }

        let ast = self.document.snapshot();
        let selection = self.store.state().selection.clone();
        let shown = handle
            .render(&ast)
            .and_then(|()| handle.set_selection(selection.as_ref()));
        if let Err(err) = shown {
            if let Err(teardown) = handle.destroy() {
                warn!(adapter = %kind, error = %teardown, "failed adapter didn't tear down");
            }
            return Err(err);
        }
        self.adapter = Some(handle);
        Ok(())
    }

    /// Registered adapter factories. Still answers after
    /// [`destroy`](Self::destroy) so hosts can inspect what was registered.
    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn focus(&mut self) -> Result<(), KernelError> {
        self.ensure_ready()?;
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.focus()?;
        }
        Ok(())
    }

    pub fn blur(&mut self) -> Result<(), KernelError> {
        self.ensure_ready()?;
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.blur()?;
        }
        Ok(())
    }

    // ---- plugins ----

    /// Register and start a plugin. Re-registering a live id is a logged
    /// no-op.
    pub fn register_plugin(&mut self, plugin: impl Plugin + 'static) -> Result<PluginId, KernelError> {
        self.ensure_ready()?;
        let mut host = plugin_host!(self);
        let id = self.plugins.register(Box::new(plugin), &mut host);
        self.pump();
        Ok(id?)
    }

    pub fn unregister_plugin(&mut self, id: &PluginId) -> Result<(), KernelError> {
        self.ensure_ready()?;
        let mut host = plugin_host!(self);
        let result = self.plugins.unregister(id, &mut host);
        self.pump();
        Ok(result?)
    }

    pub fn enable_plugin(&mut self, id: &PluginId) -> Result<(), KernelError> {
        self.ensure_ready()?;
        Ok(self.plugins.enable(id)?)
    }

    pub fn disable_plugin(&mut self, id: &PluginId) -> Result<(), KernelError> {
        self.ensure_ready()?;
        Ok(self.plugins.disable(id)?)
    }

    /// Lifecycle state of `id`. Readable after [`destroy`](Self::destroy),
    /// where every plugin that was registered reports
    /// [`PluginState::Destroyed`].
    pub fn plugin_state(&self, id: &PluginId) -> PluginState {
        self.plugins.state(id)
    }

    /// Read-only view of the plugin set, kept after destroy for inspection.
    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }
}

impl Drop for EditorKernel {
    fn drop(&mut self) {
        if self.status != KernelStatus::Destroyed {
            // Destroy can only fail on an already destroyed kernel.
            let _ = self.destroy();
        }
    }
}
