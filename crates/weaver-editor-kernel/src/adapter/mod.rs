//! View adapters: the contract every rendering back-end implements, and the
//! registry the kernel creates them from.
//!
//! Adapters never own the document. They receive AST snapshots through
//! [`ViewAdapter::render`] / [`ViewAdapter::update`] and report user intent
//! back through the [`KernelSender`] handed to them at mount time.

pub mod headless;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::ast::DocumentAst;
use crate::cancel::CancellationToken;
use crate::document::DocumentChange;
use crate::error::AdapterError;
use crate::kernel::KernelSender;
use crate::types::{AdapterKind, MountPoint, Selection, Viewport};

/// A live rendering back-end.
///
/// Implementations must release everything they installed (listeners, host
/// resources) in [`destroy`](Self::destroy). The kernel never calls any
/// method after `destroy`; [`AdapterHandle`] enforces that.
pub trait ViewAdapter: Send {
    fn kind(&self) -> &AdapterKind;

    /// Full render of `ast`.
    fn render(&mut self, ast: &DocumentAst) -> Result<(), AdapterError>;

    /// Incremental update. `changes` lists what moved since the last
    /// render/update; only the touched nodes should be redrawn.
    fn update(&mut self, ast: &DocumentAst, changes: &[DocumentChange]) -> Result<(), AdapterError>;

    fn selection(&self) -> Option<Selection>;

    fn set_selection(&mut self, selection: Option<&Selection>) -> Result<(), AdapterError>;

    fn viewport(&self) -> Viewport;

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), AdapterError>;

    fn focus(&mut self) -> Result<(), AdapterError>;

    fn blur(&mut self) -> Result<(), AdapterError>;

    fn is_focused(&self) -> bool;

    /// Release every resource. Called at most once.
    fn destroy(&mut self) -> Result<(), AdapterError>;
}

/// Everything an adapter gets at creation time.
#[derive(Debug, Clone)]
pub struct MountContext {
    pub kind: AdapterKind,
    pub mount: MountPoint,
    /// Adapter-specific options, opaque to the kernel.
    pub options: Value,
    /// Channel for reporting selection changes, input and edits back.
    pub sink: KernelSender,
    pub cancel: CancellationToken,
}

pub type CreateFuture = BoxFuture<'static, Result<Box<dyn ViewAdapter>, AdapterError>>;

/// Creates adapters of one kind.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, ctx: MountContext) -> CreateFuture;
}

impl<F, Fut> AdapterFactory for F
where
    F: Fn(MountContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Box<dyn ViewAdapter>, AdapterError>> + Send + 'static,
{
    fn create(&self, ctx: MountContext) -> CreateFuture {
        Box::pin(self(ctx))
    }
}

/// Something an adapter kind can do. Informational; commands and plugins
/// may consult it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdapterCapability {
    TextEditing,
    BlockSelection,
    Zoom,
    Pan,
    IncrementalUpdate,
    Other(SmolStr),
}

/// A registered adapter kind.
#[derive(Clone)]
pub struct AdapterDescriptor {
    pub kind: AdapterKind,
    pub factory: Arc<dyn AdapterFactory>,
    pub capabilities: Vec<AdapterCapability>,
}

impl AdapterDescriptor {
    pub fn new(kind: impl Into<AdapterKind>, factory: impl AdapterFactory + 'static) -> Self {
        Self {
            kind: kind.into(),
            factory: Arc::new(factory),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: AdapterCapability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn supports(&self, capability: &AdapterCapability) -> bool {
        self.capabilities.contains(capability)
    }
}

impl fmt::Debug for AdapterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterDescriptor")
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Type tag → factory mapping. One per kernel.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    descriptors: HashMap<AdapterKind, AdapterDescriptor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Returns the descriptor it replaced, if any.
    pub fn register(&mut self, descriptor: AdapterDescriptor) -> Option<AdapterDescriptor> {
        debug!(adapter = %descriptor.kind, "adapter registered");
        let previous = self.descriptors.insert(descriptor.kind.clone(), descriptor);
        if let Some(prev) = &previous {
            warn!(adapter = %prev.kind, "adapter kind re-registered, replacing factory");
        }
        previous
    }

    pub fn get(&self, kind: &AdapterKind) -> Option<&AdapterDescriptor> {
        self.descriptors.get(kind)
    }

    pub fn contains(&self, kind: &AdapterKind) -> bool {
        self.descriptors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &AdapterKind> {
        self.descriptors.keys()
    }

    /// Start creating an adapter of `ctx.kind`.
    pub fn create(&self, ctx: MountContext) -> Result<CreateFuture, AdapterError> {
        let descriptor = self
            .descriptors
            .get(&ctx.kind)
            .ok_or_else(|| AdapterError::UnknownAdapter(ctx.kind.clone()))?;
        Ok(descriptor.factory.create(ctx))
    }
}

/// Owning wrapper around a live adapter.
///
/// Guarantees `destroy` runs exactly once (explicitly or on drop) and turns
/// any call after it into [`AdapterError::Stale`].
pub struct AdapterHandle {
    kind: AdapterKind,
    inner: Option<Box<dyn ViewAdapter>>,
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("kind", &self.kind)
            .field("destroyed", &self.inner.is_none())
            .finish()
    }
}

impl AdapterHandle {
    pub fn new(adapter: Box<dyn ViewAdapter>) -> Self {
        Self {
            kind: adapter.kind().clone(),
            inner: Some(adapter),
        }
    }

    pub fn kind(&self) -> &AdapterKind {
        &self.kind
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_none()
    }

    fn live(&self) -> Result<&dyn ViewAdapter, AdapterError> {
        self.inner
            .as_deref()
            .ok_or_else(|| AdapterError::Stale(self.kind.clone()))
    }

    fn live_mut(&mut self) -> Result<&mut (dyn ViewAdapter + 'static), AdapterError> {
        match self.inner.as_deref_mut() {
            Some(adapter) => Ok(adapter),
            None => Err(AdapterError::Stale(self.kind.clone())),
        }
    }

    pub fn render(&mut self, ast: &DocumentAst) -> Result<(), AdapterError> {
        self.live_mut()?.render(ast)
    }

    pub fn update(&mut self, ast: &DocumentAst, changes: &[DocumentChange]) -> Result<(), AdapterError> {
        self.live_mut()?.update(ast, changes)
    }

    pub fn selection(&self) -> Result<Option<Selection>, AdapterError> {
        Ok(self.live()?.selection())
    }

    pub fn set_selection(&mut self, selection: Option<&Selection>) -> Result<(), AdapterError> {
        self.live_mut()?.set_selection(selection)
    }

    pub fn viewport(&self) -> Result<Viewport, AdapterError> {
        Ok(self.live()?.viewport())
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<(), AdapterError> {
        self.live_mut()?.set_viewport(viewport)
    }

    pub fn focus(&mut self) -> Result<(), AdapterError> {
        self.live_mut()?.focus()
    }

    pub fn blur(&mut self) -> Result<(), AdapterError> {
        self.live_mut()?.blur()
    }

    pub fn is_focused(&self) -> Result<bool, AdapterError> {
        Ok(self.live()?.is_focused())
    }

    /// Destroy the adapter. Later calls are no-ops.
    pub fn destroy(&mut self) -> Result<(), AdapterError> {
        match self.inner.take() {
            Some(mut adapter) => {
                debug!(adapter = %self.kind, "destroying adapter");
                adapter.destroy()
            }
            None => Ok(()),
        }
    }
}

impl Drop for AdapterHandle {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            warn!(adapter = %self.kind, error = %err, "adapter destroy failed during drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::headless::{HeadlessFactory, HeadlessRecorder};
    use super::*;
    use crate::kernel::inbox::Inbox;

    fn ctx(kind: AdapterKind) -> MountContext {
        MountContext {
            kind,
            mount: MountPoint::new("root"),
            options: Value::Null,
            sink: Inbox::new().sender(),
            cancel: CancellationToken::none(),
        }
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let registry = AdapterRegistry::new();
        let err = registry.create(ctx(AdapterKind::GRAPH)).err().unwrap();
        assert_eq!(err, AdapterError::UnknownAdapter(AdapterKind::GRAPH));
    }

    #[tokio::test]
    async fn test_handle_destroys_once_then_goes_stale() {
        let recorder = HeadlessRecorder::new();
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterDescriptor::new(
            AdapterKind::CANVAS,
            HeadlessFactory::new(recorder.clone()),
        ));
        let adapter = registry
            .create(ctx(AdapterKind::CANVAS))
            .unwrap()
            .await
            .unwrap();
        let mut handle = AdapterHandle::new(adapter);

        handle.destroy().unwrap();
        handle.destroy().unwrap();
        drop(handle);
        assert_eq!(recorder.destroyed(), 1);
    }

    #[tokio::test]
    async fn test_stale_after_destroy() {
        let recorder = HeadlessRecorder::new();
        let adapter = HeadlessFactory::new(recorder)
            .create(ctx(AdapterKind::TABLE))
            .await
            .unwrap();
        let mut handle = AdapterHandle::new(adapter);
        handle.destroy().unwrap();
        assert_eq!(
            handle.render(&DocumentAst::new()),
            Err(AdapterError::Stale(AdapterKind::TABLE))
        );
        assert_eq!(
            handle.is_focused(),
            Err(AdapterError::Stale(AdapterKind::TABLE))
        );
    }

    #[tokio::test]
    async fn test_drop_destroys() {
        let recorder = HeadlessRecorder::new();
        let adapter = HeadlessFactory::new(recorder.clone())
            .create(ctx(AdapterKind::GRAPH))
            .await
            .unwrap();
        drop(AdapterHandle::new(adapter));
        assert_eq!(recorder.destroyed(), 1);
    }

    #[test]
    fn test_closure_factory() {
        let descriptor = AdapterDescriptor::new("custom", |_ctx: MountContext| async {
            Err::<Box<dyn ViewAdapter>, _>(AdapterError::Mount {
                kind: "custom".into(),
                reason: "no host".into(),
            })
        })
        .with_capability(AdapterCapability::Zoom);
        assert!(descriptor.supports(&AdapterCapability::Zoom));
        assert!(!descriptor.supports(&AdapterCapability::Pan));
    }
}
