//! Plugins installed by `init` unless the config leaves them out.

pub mod ai_assist;
pub mod autosave;
pub mod outline;
pub mod shortcuts;

pub use ai_assist::AiAssistPlugin;
pub use autosave::AutosavePlugin;
pub use outline::{OutlineEntry, OutlinePlugin};
pub use shortcuts::ShortcutsPlugin;

use crate::config::PluginsConfig;
use crate::plugin::Plugin;

/// Priority of commands the built-in plugins register. Anything registered
/// under the same id at the default priority (0) takes precedence.
pub const BUILTIN_PRIORITY: i32 = -100;

/// The default plugin set for `config`, in installation order.
pub fn defaults(config: &PluginsConfig) -> Vec<Box<dyn Plugin>> {
    let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
    if let Some(autosave) = &config.autosave {
        plugins.push(Box::new(AutosavePlugin::new(autosave.clone())));
    }
    if let Some(shortcuts) = &config.shortcuts {
        plugins.push(Box::new(ShortcutsPlugin::new(shortcuts.clone())));
    }
    if config.outline {
        plugins.push(Box::new(OutlinePlugin::new()));
    }
    if config.ai_assist {
        plugins.push(Box::new(AiAssistPlugin::new()));
    }
    plugins
}
