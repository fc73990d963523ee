//! weaver-editor-kernel: a multi-modal document editing kernel.
//!
//! One canonical document tree, edited through interchangeable views.
//!
//! This crate provides:
//! - `DocumentModel` - the canonical AST with indexes, undo and change tracking
//! - `StateStore` - immutable editor state driven by a pure reducer
//! - `EventBus` - topic pub/sub with re-entrant emits queued, not nested
//! - `ViewAdapter` / `AdapterRegistry` - pluggable views over the same tree
//! - `CommandRegistry` - context-gated, priority-resolved commands
//! - `PluginManager` - capability-checked plugin lifecycle
//! - `EditorKernel` - owns all of the above and serialises every mutation

pub mod adapter;
pub mod ast;
pub mod cancel;
pub mod command;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod history;
pub mod input;
pub mod kernel;
pub mod plugin;
pub mod plugins;
pub mod services;
pub mod state;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod types;

pub use adapter::{
    AdapterCapability, AdapterDescriptor, AdapterFactory, AdapterHandle, AdapterRegistry,
    MountContext, ViewAdapter,
};
pub use ast::{AstNode, DocumentAst, NodeId, NodePatch, SerializedNode};
pub use cancel::{CancellationReason, CancellationSource, CancellationToken};
pub use command::{Command, CommandContext, CommandId, CommandOutcome, CommandRegistry, CommandScope};
pub use config::KernelConfig;
pub use document::{DocumentAction, DocumentChange, DocumentModel};
pub use error::{
    AdapterError, CommandError, ExternalError, HandlerError, KernelError, PluginError,
    StructuralError,
};
pub use events::{Event, EventBus, Payload, Subscription, Topic};
pub use history::UndoManager;
pub use input::{InputEvent, InputOutcome, Key, KeyCombo, Modifiers, MouseEvent};
pub use kernel::{
    EditorKernel, InitOptions, KernelAction, KernelBuilder, KernelSender, KernelStatus, ViewState,
};
pub use plugin::{
    Capability, Plugin, PluginBus, PluginContext, PluginId, PluginManager, PluginManifest, PluginState,
};
pub use services::{AiBackend, AiRequest, DocumentSnapshot, MemoryStore, Persistence};
pub use smol_str::SmolStr;
pub use state::{Action, EditorState, StateStore};
pub use types::{AdapterKind, ContentRef, MountPoint, Selection, TextPosition, Viewport};
