use std::sync::Arc;

use super::EditorKernel;
use crate::adapter::{AdapterDescriptor, AdapterRegistry};
use crate::config::KernelConfig;
use crate::plugin::Plugin;
use crate::services::{AiBackend, Persistence, Services};

/// Assembles an [`EditorKernel`] before `init`.
///
/// ```ignore
/// let mut kernel = EditorKernel::builder()
///     .adapter(AdapterDescriptor::new(AdapterKind::RICH_TEXT, factory))
///     .persistence(Arc::new(MemoryStore::new()))
///     .build();
/// kernel.init(MountPoint::new("main"), None, InitOptions::default()).await?;
/// ```
#[derive(Default)]
pub struct KernelBuilder {
    config: KernelConfig,
    adapters: AdapterRegistry,
    services: Services,
    plugins: Vec<Box<dyn Plugin>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an adapter type. A later descriptor for the same kind
    /// replaces the earlier one.
    pub fn adapter(mut self, descriptor: AdapterDescriptor) -> Self {
        self.adapters.register(descriptor);
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.services.persistence = Some(persistence);
        self
    }

    pub fn ai(mut self, backend: Arc<dyn AiBackend>) -> Self {
        self.services.ai = Some(backend);
        self
    }

    /// Plugin started by `init`, after the configured defaults.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn build(self) -> EditorKernel {
        EditorKernel::from_parts(self.config, self.adapters, self.services, self.plugins)
    }
}
