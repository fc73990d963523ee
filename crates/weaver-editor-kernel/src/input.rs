//! Normalised input events and keybindings.
//!
//! Adapters translate whatever their rendering technology delivers into
//! [`InputEvent`]s. The kernel matches key events against the [`Keymap`] and
//! runs the bound command; everything else is published on the bus.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use smol_str::SmolStr;
use thiserror::Error;

use crate::command::CommandId;
use crate::plugin::PluginId;
use crate::types::TextPosition;

/// Key values for keyboard input.
///
/// Platform-agnostic key representation. Adapters convert from native key
/// events to this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A character key. Stored lowercase for letters.
    Character(SmolStr),
    Unidentified,

    Backspace,
    Delete,
    Enter,
    Tab,
    Escape,
    Space,

    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Home,
    End,
    PageUp,
    PageDown,

    F(u8),
}

impl Key {
    pub fn character(s: impl Into<SmolStr>) -> Self {
        let s: SmolStr = s.into();
        if s.chars().all(|c| !c.is_uppercase()) {
            Self::Character(s)
        } else {
            Self::Character(s.to_lowercase().into())
        }
    }

    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Self::ArrowLeft
                | Self::ArrowRight
                | Self::ArrowUp
                | Self::ArrowDown
                | Self::Home
                | Self::End
                | Self::PageUp
                | Self::PageDown
        )
    }

    fn name(&self) -> SmolStr {
        match self {
            Self::Character(c) => c.to_uppercase().into(),
            Self::Unidentified => "Unidentified".into(),
            Self::Backspace => "Backspace".into(),
            Self::Delete => "Delete".into(),
            Self::Enter => "Enter".into(),
            Self::Tab => "Tab".into(),
            Self::Escape => "Escape".into(),
            Self::Space => "Space".into(),
            Self::ArrowLeft => "ArrowLeft".into(),
            Self::ArrowRight => "ArrowRight".into(),
            Self::ArrowUp => "ArrowUp".into(),
            Self::ArrowDown => "ArrowDown".into(),
            Self::Home => "Home".into(),
            Self::End => "End".into(),
            Self::PageUp => "PageUp".into(),
            Self::PageDown => "PageDown".into(),
            Self::F(n) => smol_str::format_smolstr!("F{n}"),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        let key = match name.to_ascii_lowercase().as_str() {
            "backspace" => Self::Backspace,
            "delete" | "del" => Self::Delete,
            "enter" | "return" => Self::Enter,
            "tab" => Self::Tab,
            "escape" | "esc" => Self::Escape,
            "space" => Self::Space,
            "arrowleft" | "left" => Self::ArrowLeft,
            "arrowright" | "right" => Self::ArrowRight,
            "arrowup" | "up" => Self::ArrowUp,
            "arrowdown" | "down" => Self::ArrowDown,
            "home" => Self::Home,
            "end" => Self::End,
            "pageup" => Self::PageUp,
            "pagedown" => Self::PageDown,
            other => {
                if let Some(n) = other.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    Self::F(n)
                } else if other.chars().count() == 1 {
                    Self::character(other)
                } else {
                    return None;
                }
            }
        };
        Some(key)
    }
}

/// Modifier key state for a key combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    pub const CTRL: Self = Self {
        ctrl: true,
        ..Self::NONE
    };

    pub const ALT: Self = Self {
        alt: true,
        ..Self::NONE
    };

    pub const SHIFT: Self = Self {
        shift: true,
        ..Self::NONE
    };

    pub const META: Self = Self {
        meta: true,
        ..Self::NONE
    };

    pub const CTRL_SHIFT: Self = Self {
        ctrl: true,
        shift: true,
        ..Self::NONE
    };

    pub const META_SHIFT: Self = Self {
        meta: true,
        shift: true,
        ..Self::NONE
    };

    /// Cmd on Mac, Ctrl elsewhere.
    pub fn primary(is_mac: bool) -> Self {
        if is_mac { Self::META } else { Self::CTRL }
    }

    pub fn primary_shift(is_mac: bool) -> Self {
        if is_mac {
            Self::META_SHIFT
        } else {
            Self::CTRL_SHIFT
        }
    }
}

/// A key combination.
///
/// Parses from and prints as `Ctrl+Shift+Z` style strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCombo {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_modifiers(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub fn ctrl(key: Key) -> Self {
        Self::with_modifiers(key, Modifiers::CTRL)
    }

    pub fn ctrl_shift(key: Key) -> Self {
        Self::with_modifiers(key, Modifiers::CTRL_SHIFT)
    }

    pub fn primary(key: Key, is_mac: bool) -> Self {
        Self::with_modifiers(key, Modifiers::primary(is_mac))
    }

    pub fn primary_shift(key: Key, is_mac: bool) -> Self {
        Self::with_modifiers(key, Modifiers::primary_shift(is_mac))
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (held, name) in [
            (m.ctrl, "Ctrl"),
            (m.alt, "Alt"),
            (m.shift, "Shift"),
            (m.meta, "Meta"),
        ] {
            if held {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(&self.key.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid key combination: {0:?}")]
pub struct KeyComboParseError(pub String);

impl FromStr for KeyCombo {
    type Err = KeyComboParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || KeyComboParseError(s.to_string());
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        // "Ctrl++" binds the plus key itself.
        if s.ends_with("++") {
            parts.truncate(parts.len().saturating_sub(2));
            parts.push("+");
        }
        let (key, mods) = parts.split_last().ok_or_else(err)?;
        let mut modifiers = Modifiers::NONE;
        for m in mods {
            match m.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" | "option" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "meta" | "cmd" | "super" => modifiers.meta = true,
                _ => return Err(err()),
            }
        }
        let key = Key::from_name(key).ok_or_else(err)?;
        Ok(Self { key, modifiers })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseAction {
    Down,
    Up,
    Click,
    DoubleClick,
    Move,
}

/// Pointer event in adapter coordinates, optionally resolved to a document position.
#[derive(Debug, Clone, PartialEq)]
pub struct MouseEvent {
    pub action: MouseAction,
    pub button: Option<MouseButton>,
    pub x: f64,
    pub y: f64,
    pub modifiers: Modifiers,
    pub target: Option<TextPosition>,
}

/// Normalised input from the active adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(KeyCombo),
    Mouse(MouseEvent),
}

/// What the kernel did with an input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    /// A keybinding matched and its command ran.
    Handled { command: CommandId, result: Value },
    /// No binding matched; the event was published on the bus.
    NotHandled,
    /// A binding matched but its command didn't apply; the adapter should
    /// apply its native behaviour.
    PassThrough,
}

/// A key combination bound to a command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBinding {
    pub combo: KeyCombo,
    pub command: CommandId,
    pub payload: Value,
    pub owner: Option<PluginId>,
}

/// Bindings from key combinations to commands.
///
/// When several bindings share a combination, the most recently added one
/// whose owner is enabled wins.
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    bindings: Vec<KeyBinding>,
}

impl Keymap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, binding: KeyBinding) {
        self.bindings.push(binding);
    }

    /// Drop every binding owned by `owner`. Returns how many were removed.
    pub fn unbind_owner(&mut self, owner: &PluginId) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|b| b.owner.as_ref() != Some(owner));
        before - self.bindings.len()
    }

    pub fn lookup(
        &self,
        combo: &KeyCombo,
        owner_enabled: impl Fn(&PluginId) -> bool,
    ) -> Option<&KeyBinding> {
        self.bindings
            .iter()
            .rev()
            .filter(|b| &b.combo == combo)
            .find(|b| b.owner.as_ref().is_none_or(&owner_enabled))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}
