//! Error types for the editing kernel.
//!
//! Structural and command errors are caller-visible and non-fatal: the kernel
//! stays READY after returning them. Adapter mount failures degrade the view
//! to unmounted. Plugin failures are isolated per plugin. External service
//! errors go back to whoever invoked the service; retry policy is theirs.

use miette::Diagnostic;
use smol_str::SmolStr;
use thiserror::Error;

use crate::ast::NodeId;
use crate::command::CommandId;
use crate::config::ConfigError;
use crate::kernel::{KernelComponent, KernelStatus};
use crate::plugin::{PluginId, PluginState};
use crate::types::AdapterKind;

/// Errors from document tree operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StructuralError {
    /// A referenced node id does not exist.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// The operation would make a node its own ancestor.
    #[error("placing {node} under {parent} would make it its own ancestor")]
    Cycle { node: NodeId, parent: NodeId },

    /// A node id is already present in the document.
    #[error("duplicate node id: {0}")]
    DuplicateId(NodeId),

    /// The root cannot be removed or relocated.
    #[error("the root node cannot be removed or relocated")]
    RootImmutable,

    /// Child index past the end of the parent's child list.
    #[error("index {index} out of bounds for {parent} ({len} children)")]
    IndexOutOfBounds {
        parent: NodeId,
        index: usize,
        len: usize,
    },

    /// Input that doesn't describe a valid tree.
    #[error("malformed document: {0}")]
    Malformed(String),
}

/// Errors from view adapters and the adapter registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdapterError {
    /// No adapter registered under this type tag.
    #[error("no adapter registered for {0}")]
    UnknownAdapter(AdapterKind),

    /// The adapter failed to mount.
    #[error("failed to mount {kind}: {reason}")]
    Mount { kind: AdapterKind, reason: String },

    /// Operation attempted on an adapter after `destroy()`.
    #[error("adapter {0} has been destroyed")]
    Stale(AdapterKind),

    /// Mount was cancelled before the adapter became active.
    #[error("mounting {0} was cancelled")]
    Cancelled(AdapterKind),

    /// The adapter rejected a render or update.
    #[error("render failed: {0}")]
    Render(String),
}

/// Errors from command resolution and execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    /// No command registered under this id.
    #[error("command not found: {0}")]
    NotFound(CommandId),

    /// Commands exist under this id but none apply to the context.
    #[error("no applicable handler for command {0}")]
    NotApplicable(CommandId),

    /// The payload doesn't match what the handler expects.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler ran and failed.
    #[error("command failed: {0}")]
    Failed(String),

    /// A structural edit requested by the handler was rejected.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// An external collaborator failed.
    #[error(transparent)]
    External(#[from] ExternalError),
}

/// Errors from the plugin lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PluginError {
    /// The requested lifecycle transition isn't allowed from the current state.
    #[error("plugin {id} cannot go from {from} to {to}")]
    InvalidState {
        id: PluginId,
        from: PluginState,
        to: PluginState,
    },

    /// The manifest failed validation.
    #[error("invalid plugin manifest: {0}")]
    InvalidManifest(String),

    /// The plugin tried something its manifest doesn't declare.
    #[error("plugin {id} did not declare capability {capability}")]
    CapabilityDenied { id: PluginId, capability: SmolStr },

    /// `init` failed.
    #[error("plugin {id} failed to initialise: {reason}")]
    Init { id: PluginId, reason: String },

    /// `destroy` failed.
    #[error("plugin {id} failed to tear down: {reason}")]
    Destroy { id: PluginId, reason: String },
}

/// Errors from external collaborators (persistence, AI backend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExternalError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("not found: {0}")]
    NotFound(String),

    /// An operation kind the boundary doesn't recognise.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No collaborator of this kind is configured.
    #[error("{0} is not configured")]
    Unavailable(&'static str),

    /// The caller cancelled the request.
    #[error("request cancelled: {0}")]
    Cancelled(String),
}

/// Error returned by an event handler.
///
/// Handler errors are logged by the bus and never stop delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError(s.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError(s)
    }
}

/// Top-level error returned from [`EditorKernel`](crate::EditorKernel) operations.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum KernelError {
    /// Every operation after `destroy()` fails with this.
    #[error("kernel has been destroyed")]
    #[diagnostic(code(kernel::destroyed))]
    Destroyed,

    /// The kernel isn't READY (not initialised, or init failed).
    #[error("kernel is not ready ({0})")]
    #[diagnostic(code(kernel::not_ready))]
    NotReady(KernelStatus),

    #[error("kernel is already initialised")]
    #[diagnostic(code(kernel::already_initialized))]
    AlreadyInitialized,

    /// The action is applied by the kernel itself and can't be dispatched.
    #[error("action {0} is reserved for the kernel")]
    #[diagnostic(
        code(kernel::reserved_action),
        help("use a DocumentAction for edits, `load` for documents, `switch_adapter` for modes")
    )]
    ReservedAction(SmolStr),

    /// A component failed during `init`. Everything already built was torn down.
    #[error("kernel init failed in {component}")]
    #[diagnostic(code(kernel::init_failed))]
    InitFailed {
        component: KernelComponent,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    #[diagnostic(code(kernel::structural))]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    #[diagnostic(code(kernel::adapter), help("switch to another adapter to recover"))]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    #[diagnostic(code(kernel::command))]
    Command(#[from] CommandError),

    #[error(transparent)]
    #[diagnostic(code(kernel::plugin))]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    #[diagnostic(code(kernel::external))]
    External(#[from] ExternalError),

    #[error(transparent)]
    #[diagnostic(code(kernel::config))]
    Config(#[from] ConfigError),
}

impl KernelError {
    /// True if the kernel remains usable after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Destroyed | Self::InitFailed { .. })
    }
}
