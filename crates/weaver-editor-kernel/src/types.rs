//! Core editor types: selection, viewport, adapter tags, content references.
//!
//! These types are rendering-technology agnostic. Offsets are character
//! offsets into a node's text payload (NOT byte offsets).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::ast::{DocumentAst, NodeId};

/// A position inside the document: a node plus a character offset into it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPosition {
    pub node: NodeId,
    pub offset: usize,
}

impl TextPosition {
    pub fn new(node: impl Into<NodeId>, offset: usize) -> Self {
        Self {
            node: node.into(),
            offset,
        }
    }
}

/// Current selection.
///
/// Either a text range (anchor is where the selection started, focus is where
/// the cursor is now) or a set of whole nodes selected as blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    Text {
        anchor: TextPosition,
        focus: TextPosition,
    },
    Block {
        nodes: BTreeSet<NodeId>,
    },
}

impl Selection {
    /// Collapsed text selection (a caret).
    pub fn caret(node: impl Into<NodeId>, offset: usize) -> Self {
        let pos = TextPosition::new(node, offset);
        Self::Text {
            anchor: pos.clone(),
            focus: pos,
        }
    }

    pub fn text(anchor: TextPosition, focus: TextPosition) -> Self {
        Self::Text { anchor, focus }
    }

    pub fn blocks(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::Block {
            nodes: nodes.into_iter().collect(),
        }
    }

    pub fn is_collapsed(&self) -> bool {
        match self {
            Self::Text { anchor, focus } => anchor == focus,
            Self::Block { nodes } => nodes.is_empty(),
        }
    }

    /// Node ids this selection references.
    pub fn nodes(&self) -> Vec<&NodeId> {
        match self {
            Self::Text { anchor, focus } => vec![&anchor.node, &focus.node],
            Self::Block { nodes } => nodes.iter().collect(),
        }
    }

    /// The node the selection's focus sits in (first block for block selections).
    pub fn focus_node(&self) -> Option<&NodeId> {
        match self {
            Self::Text { focus, .. } => Some(&focus.node),
            Self::Block { nodes } => nodes.iter().next(),
        }
    }

    /// Re-check against `ast`: a selection referencing any missing node
    /// collapses to `None`. Offsets past the end of a node's text are clamped.
    pub fn validate(self, ast: &DocumentAst) -> Option<Self> {
        if self.nodes().iter().any(|id| !ast.contains(id)) {
            return None;
        }
        match self {
            Self::Text { anchor, focus } => Some(Self::Text {
                anchor: clamp(anchor, ast),
                focus: clamp(focus, ast),
            }),
            block => Some(block),
        }
    }
}

fn clamp(mut pos: TextPosition, ast: &DocumentAst) -> TextPosition {
    let len = ast
        .get(&pos.node)
        .and_then(|n| n.text.as_ref())
        .map(|t| t.chars().count())
        .unwrap_or(0);
    pos.offset = pos.offset.min(len);
    pos
}

/// Pan/zoom/scroll state. Owned by the active adapter; reset on adapter switch.
#[derive(Clone, Debug, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn with_zoom(mut self, zoom: f64) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_scroll(mut self, x: f64, y: f64) -> Self {
        self.scroll_x = x;
        self.scroll_y = y;
        self
    }
}

/// Type tag of a rendering back-end / editor mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterKind(SmolStr);

impl AdapterKind {
    pub const RICH_TEXT: Self = Self(SmolStr::new_static("rich-text"));
    pub const GRAPH: Self = Self(SmolStr::new_static("graph"));
    pub const CANVAS: Self = Self(SmolStr::new_static("canvas"));
    pub const TABLE: Self = Self(SmolStr::new_static("table"));
    pub const TIMELINE: Self = Self(SmolStr::new_static("timeline"));

    pub fn new(kind: impl Into<SmolStr>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AdapterKind {
    fn default() -> Self {
        Self::RICH_TEXT
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AdapterKind {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies the persisted document a session is editing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(SmolStr);

impl ContentRef {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where the host wants the view mounted, plus whatever host-specific data
/// the adapter needs to find it. Opaque to the kernel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MountPoint {
    pub id: SmolStr,
    #[serde(default)]
    pub data: Value,
}

impl MountPoint {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SerializedNode;

    fn ast() -> DocumentAst {
        DocumentAst::deserialize(
            &SerializedNode::new("root", "doc")
                .with_child(SerializedNode::new("a", "paragraph").with_text("hello"))
                .with_child(SerializedNode::new("b", "paragraph")),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_node_collapses_to_none() {
        let sel = Selection::text(TextPosition::new("a", 0), TextPosition::new("gone", 1));
        assert_eq!(sel.validate(&ast()), None);

        let sel = Selection::blocks(["a".into(), "gone".into()]);
        assert_eq!(sel.validate(&ast()), None);
    }

    #[test]
    fn test_offsets_clamped_to_text() {
        let sel = Selection::text(TextPosition::new("a", 2), TextPosition::new("a", 99));
        assert_eq!(
            sel.validate(&ast()),
            Some(Selection::text(
                TextPosition::new("a", 2),
                TextPosition::new("a", 5)
            ))
        );
        assert_eq!(
            Selection::caret("b", 3).validate(&ast()),
            Some(Selection::caret("b", 0))
        );
    }

    #[test]
    fn test_collapsed() {
        assert!(Selection::caret("a", 1).is_collapsed());
        assert!(!Selection::blocks(["a".into()]).is_collapsed());
    }

    #[test]
    fn test_viewport_default_zoom() {
        assert_eq!(Viewport::default().zoom, 1.0);
    }
}
