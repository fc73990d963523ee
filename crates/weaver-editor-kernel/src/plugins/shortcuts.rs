//! Standard editing shortcuts and the history commands they drive.

use serde_json::Value;
use tracing::warn;

use super::BUILTIN_PRIORITY;
use crate::command::{Command, CommandOutcome};
use crate::config::ShortcutsConfig;
use crate::document::DocumentAction;
use crate::error::PluginError;
use crate::input::{Key, KeyCombo};
use crate::plugin::{Capability, Plugin, PluginContext, PluginManifest};

pub struct ShortcutsPlugin {
    config: ShortcutsConfig,
}

impl ShortcutsPlugin {
    pub const ID: &'static str = "shortcuts";

    pub fn new(config: ShortcutsConfig) -> Self {
        Self { config }
    }

    /// Built-in bindings for the configured platform.
    fn standard(&self) -> Vec<(KeyCombo, &'static str)> {
        let mac = self.config.mac;
        let mut bindings = vec![
            (KeyCombo::primary(Key::character("s"), mac), "save"),
            (KeyCombo::primary(Key::character("z"), mac), "history.undo"),
            (KeyCombo::primary_shift(Key::character("z"), mac), "history.redo"),
        ];
        if !mac {
            bindings.push((KeyCombo::ctrl(Key::character("y")), "history.redo"));
        }
        bindings
    }
}

impl Plugin for ShortcutsPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new(Self::ID, env!("CARGO_PKG_VERSION"))
            .with_description("Undo, redo and save shortcuts")
            .with_capability(Capability::Commands)
            .with_capability(Capability::Keybindings)
    }

    fn init(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
        ctx.register_command(
            Command::new("history.undo", |scope, _| {
                scope.dispatch(DocumentAction::Undo);
                Ok(CommandOutcome::done())
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Undo the last edit"),
        )?;
        ctx.register_command(
            Command::new("history.redo", |scope, _| {
                scope.dispatch(DocumentAction::Redo);
                Ok(CommandOutcome::done())
            })
            .with_priority(BUILTIN_PRIORITY)
            .with_description("Redo the last undone edit"),
        )?;

        for (combo, command) in self.standard() {
            ctx.bind_key(combo, command, Value::Null)?;
        }
        // Configured bindings go last so they shadow the standard ones.
        for (combo, command) in &self.config.bindings {
            match combo.parse::<KeyCombo>() {
                Ok(parsed) => ctx.bind_key(parsed, command.as_str(), Value::Null)?,
                Err(err) => warn!(%combo, %command, error = %err, "skipping shortcut"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::adapter::AdapterDescriptor;
    use crate::adapter::headless::{HeadlessFactory, HeadlessRecorder};
    use crate::config::{KernelConfig, PluginsConfig};
    use crate::input::{InputEvent, InputOutcome, Modifiers};
    use crate::kernel::{EditorKernel, InitOptions};
    use crate::types::{AdapterKind, MountPoint};

    async fn kernel(config: ShortcutsConfig) -> EditorKernel {
        let mut kernel = EditorKernel::builder()
            .config(KernelConfig {
                plugins: PluginsConfig {
                    shortcuts: Some(config),
                    ..PluginsConfig::none()
                },
                ..KernelConfig::default()
            })
            .adapter(AdapterDescriptor::new(
                AdapterKind::RICH_TEXT,
                HeadlessFactory::new(HeadlessRecorder::new()),
            ))
            .build();
        kernel
            .init(MountPoint::new("main"), None, InitOptions::default())
            .await
            .unwrap();
        kernel
    }

    fn press(combo: &str) -> InputEvent {
        InputEvent::Key(combo.parse().unwrap())
    }

    #[tokio::test]
    async fn test_undo_redo_keys() {
        let mut kernel = kernel(ShortcutsConfig {
            mac: false,
            bindings: Vec::new(),
        })
        .await;
        kernel.dispatch(DocumentAction::set_content("one")).unwrap();
        kernel.dispatch(DocumentAction::set_content("two")).unwrap();

        let outcome = kernel.handle_input(press("Ctrl+Z")).await.unwrap();
        assert!(matches!(outcome, InputOutcome::Handled { ref command, .. } if command.as_str() == "history.undo"));
        assert_eq!(kernel.document().unwrap().text(), "one");

        kernel.handle_input(press("Ctrl+Y")).await.unwrap();
        assert_eq!(kernel.document().unwrap().text(), "two");
        kernel.handle_input(press("Ctrl+Z")).await.unwrap();
        kernel.handle_input(press("Ctrl+Shift+Z")).await.unwrap();
        assert_eq!(kernel.document().unwrap().text(), "two");
    }

    #[tokio::test]
    async fn test_mac_uses_meta() {
        let mut kernel = kernel(ShortcutsConfig {
            mac: true,
            bindings: Vec::new(),
        })
        .await;
        kernel.dispatch(DocumentAction::set_content("one")).unwrap();
        assert_eq!(
            kernel.handle_input(press("Ctrl+Z")).await.unwrap(),
            InputOutcome::NotHandled
        );
        kernel.handle_input(press("Meta+Z")).await.unwrap();
        assert_eq!(kernel.document().unwrap().text(), "");
    }

    #[tokio::test]
    async fn test_configured_bindings() {
        let mut kernel = kernel(ShortcutsConfig {
            mac: false,
            bindings: vec![
                ("Ctrl+K".into(), "history.undo".into()),
                ("Hyper+Q".into(), "history.undo".into()),
            ],
        })
        .await;
        kernel.dispatch(DocumentAction::set_content("one")).unwrap();
        kernel
            .handle_input(InputEvent::Key(KeyCombo::with_modifiers(
                Key::character("k"),
                Modifiers::CTRL,
            )))
            .await
            .unwrap();
        assert_eq!(kernel.document().unwrap().text(), "");

        // Bound but nothing registered under the id.
        kernel
            .bind_key(KeyCombo::ctrl(Key::character("j")), "nope", json!({}))
            .unwrap();
        assert_eq!(
            kernel.handle_input(press("Ctrl+J")).await.unwrap(),
            InputOutcome::PassThrough
        );
    }
}
