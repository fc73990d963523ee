//! Editor state and its reducer.
//!
//! [`reduce`] is a pure function `(state, action) -> state` over immutable
//! [`EditorState`] snapshots. Snapshots are shared behind `Arc`; an action
//! that changes nothing (including any action kind the reducer doesn't
//! recognise) returns the very same `Arc`, so callers can detect no-ops with
//! [`Arc::ptr_eq`].
//!
//! [`StateStore`] is the single writer: it owns the current snapshot and
//! applies actions strictly one at a time through `&mut self`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use smol_str::SmolStr;

use crate::ast::DocumentAst;
use crate::types::{AdapterKind, ContentRef, Selection, Viewport};

/// Per-mode substate: a flat JSON object owned by one editor mode.
pub type ModeState = Map<String, Value>;

/// Immutable editor state snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    /// Which persisted document this session edits, if any.
    pub content_ref: Option<ContentRef>,
    /// Current document tree.
    pub ast: Arc<DocumentAst>,
    pub selection: Option<Selection>,
    pub viewport: Viewport,
    /// Set by any content mutation; cleared only by a matching save acknowledgement.
    pub dirty: bool,
    /// Bumped on every content mutation.
    pub revision: u64,
    /// Active editor type.
    pub mode: AdapterKind,
    pub mode_state: BTreeMap<AdapterKind, ModeState>,
}

impl Default for EditorState {
    fn default() -> Self {
        Self::new(Arc::new(DocumentAst::new()), AdapterKind::default())
    }
}

impl EditorState {
    pub fn new(ast: Arc<DocumentAst>, mode: AdapterKind) -> Self {
        Self {
            content_ref: None,
            ast,
            selection: None,
            viewport: Viewport::default(),
            dirty: false,
            revision: 0,
            mode,
            mode_state: BTreeMap::new(),
        }
    }

    /// Substate for the active mode.
    pub fn active_mode_state(&self) -> Option<&ModeState> {
        self.mode_state.get(&self.mode)
    }

    pub fn mode_value(&self, key: &str) -> Option<&Value> {
        self.active_mode_state().and_then(|s| s.get(key))
    }
}

/// State store actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The document model changed structurally; carries the new snapshot.
    DocumentChanged { ast: Arc<DocumentAst> },
    /// A document was loaded from persistence. Not a user edit: dirty is cleared.
    Load {
        content_ref: Option<ContentRef>,
        ast: Arc<DocumentAst>,
    },
    SetSelection { selection: Option<Selection> },
    SetViewport { viewport: Viewport },
    SetContentRef { content_ref: Option<ContentRef> },
    /// Activate another editor mode. The viewport is adapter-local and resets.
    SwitchMode { mode: AdapterKind },
    /// Shallow-merge keys into one mode's substate.
    MergeModeState { mode: AdapterKind, patch: ModeState },
    /// Replace one mode's substate wholesale.
    ResetModeState { mode: AdapterKind, state: ModeState },
    /// Persistence acknowledged a save of `revision`.
    MarkSaved { revision: u64 },
    /// Anything else. The reducer leaves state untouched.
    Other { kind: SmolStr, payload: Value },
}

impl Action {
    pub fn kind(&self) -> &str {
        match self {
            Self::DocumentChanged { .. } => "document_changed",
            Self::Load { .. } => "load",
            Self::SetSelection { .. } => "set_selection",
            Self::SetViewport { .. } => "set_viewport",
            Self::SetContentRef { .. } => "set_content_ref",
            Self::SwitchMode { .. } => "switch_mode",
            Self::MergeModeState { .. } => "merge_mode_state",
            Self::ResetModeState { .. } => "reset_mode_state",
            Self::MarkSaved { .. } => "mark_saved",
            Self::Other { kind, .. } => kind.as_str(),
        }
    }

    pub fn other(kind: impl Into<SmolStr>, payload: Value) -> Self {
        Self::Other {
            kind: kind.into(),
            payload,
        }
    }
}

/// Pure reducer.
pub fn reduce(state: &Arc<EditorState>, action: &Action) -> Arc<EditorState> {
    match action {
        Action::DocumentChanged { ast } => {
            let mut next = EditorState::clone(state);
            next.selection = next.selection.take().and_then(|s| s.validate(ast));
            next.ast = Arc::clone(ast);
            next.revision += 1;
            next.dirty = true;
            Arc::new(next)
        }
        Action::Load { content_ref, ast } => {
            let mut next = EditorState::clone(state);
            next.selection = next.selection.take().and_then(|s| s.validate(ast));
            next.ast = Arc::clone(ast);
            next.content_ref = content_ref.clone();
            next.revision += 1;
            next.dirty = false;
            Arc::new(next)
        }
        Action::SetSelection { selection } => {
            let selection = selection.clone().and_then(|s| s.validate(&state.ast));
            if selection == state.selection {
                return Arc::clone(state);
            }
            Arc::new(EditorState {
                selection,
                ..EditorState::clone(state)
            })
        }
        Action::SetViewport { viewport } => {
            if *viewport == state.viewport {
                return Arc::clone(state);
            }
            Arc::new(EditorState {
                viewport: *viewport,
                ..EditorState::clone(state)
            })
        }
        Action::SetContentRef { content_ref } => {
            if *content_ref == state.content_ref {
                return Arc::clone(state);
            }
            Arc::new(EditorState {
                content_ref: content_ref.clone(),
                ..EditorState::clone(state)
            })
        }
        Action::SwitchMode { mode } => {
            if *mode == state.mode && state.viewport == Viewport::default() {
                return Arc::clone(state);
            }
            Arc::new(EditorState {
                mode: mode.clone(),
                viewport: Viewport::default(),
                ..EditorState::clone(state)
            })
        }
        Action::MergeModeState { mode, patch } => {
            let mut next = EditorState::clone(state);
            let slot = next.mode_state.entry(mode.clone()).or_default();
            for (key, value) in patch {
                slot.insert(key.clone(), value.clone());
            }
            Arc::new(next)
        }
        Action::ResetModeState { mode, state: substate } => {
            let mut next = EditorState::clone(state);
            next.mode_state.insert(mode.clone(), substate.clone());
            Arc::new(next)
        }
        Action::MarkSaved { revision } => {
            // A save of an older revision doesn't cover later edits.
            if !state.dirty || *revision != state.revision {
                return Arc::clone(state);
            }
            Arc::new(EditorState {
                dirty: false,
                ..EditorState::clone(state)
            })
        }
        Action::Other { .. } => Arc::clone(state),
    }
}

/// Single-writer holder of the current [`EditorState`].
#[derive(Debug, Default)]
pub struct StateStore {
    current: Arc<EditorState>,
    dispatched: u64,
}

impl StateStore {
    pub fn new(initial: EditorState) -> Self {
        Self {
            current: Arc::new(initial),
            dispatched: 0,
        }
    }

    pub fn state(&self) -> Arc<EditorState> {
        Arc::clone(&self.current)
    }

    /// Apply one action. Returns true if the state changed.
    pub fn dispatch(&mut self, action: &Action) -> bool {
        self.dispatched += 1;
        let next = reduce(&self.current, action);
        let changed = !Arc::ptr_eq(&next, &self.current);
        if changed {
            tracing::trace!(action = action.kind(), revision = next.revision, "state updated");
        }
        self.current = next;
        changed
    }

    /// Number of actions applied so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ast::SerializedNode;
    use crate::types::TextPosition;

    fn doc(children: &[&str]) -> Arc<DocumentAst> {
        let mut root = SerializedNode::new("root", "doc");
        for id in children {
            root = root.with_child(SerializedNode::new(*id, "paragraph").with_text("text"));
        }
        Arc::new(DocumentAst::deserialize(&root).unwrap())
    }

    fn obj(value: Value) -> ModeState {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unknown_action_returns_same_reference() {
        let state = Arc::new(EditorState::default());
        let next = reduce(&state, &Action::other("frobnicate", json!({"x": 1})));
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn test_document_change_sets_dirty_and_revalidates_selection() {
        let state = Arc::new(EditorState::new(doc(&["a", "b"]), AdapterKind::RICH_TEXT));
        let state = reduce(
            &state,
            &Action::SetSelection {
                selection: Some(Selection::caret("b", 2)),
            },
        );
        assert_eq!(state.selection, Some(Selection::caret("b", 2)));

        let state = reduce(&state, &Action::DocumentChanged { ast: doc(&["a"]) });
        assert!(state.dirty);
        assert_eq!(state.revision, 1);
        assert_eq!(state.selection, None);
    }

    #[test]
    fn test_selection_to_missing_node_is_null() {
        let state = Arc::new(EditorState::new(doc(&["a"]), AdapterKind::RICH_TEXT));
        let next = reduce(
            &state,
            &Action::SetSelection {
                selection: Some(Selection::text(
                    TextPosition::new("a", 0),
                    TextPosition::new("ghost", 0),
                )),
            },
        );
        assert_eq!(next.selection, None);
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn test_mark_saved_only_for_current_revision() {
        let state = Arc::new(EditorState::default());
        let state = reduce(&state, &Action::DocumentChanged { ast: doc(&["a"]) });
        let state = reduce(&state, &Action::DocumentChanged { ast: doc(&["a", "b"]) });
        assert_eq!(state.revision, 2);

        let stale = reduce(&state, &Action::MarkSaved { revision: 1 });
        assert!(stale.dirty);
        let saved = reduce(&state, &Action::MarkSaved { revision: 2 });
        assert!(!saved.dirty);
    }

    #[test]
    fn test_mode_state_merges_shallowly() {
        let mode = AdapterKind::GRAPH;
        let state = Arc::new(EditorState::default());
        let state = reduce(
            &state,
            &Action::MergeModeState {
                mode: mode.clone(),
                patch: obj(json!({"layout": "force", "nested": {"a": 1}})),
            },
        );
        let state = reduce(
            &state,
            &Action::MergeModeState {
                mode: mode.clone(),
                patch: obj(json!({"nested": {"b": 2}})),
            },
        );
        assert_eq!(
            Value::Object(state.mode_state[&mode].clone()),
            json!({"layout": "force", "nested": {"b": 2}})
        );
    }

    #[test]
    fn test_mode_state_reset_replaces_wholesale() {
        let mode = AdapterKind::TABLE;
        let state = Arc::new(EditorState::default());
        let state = reduce(
            &state,
            &Action::MergeModeState {
                mode: mode.clone(),
                patch: obj(json!({"sort": "asc", "filter": "x"})),
            },
        );
        let state = reduce(
            &state,
            &Action::ResetModeState {
                mode: mode.clone(),
                state: obj(json!({"sort": "desc"})),
            },
        );
        assert_eq!(
            Value::Object(state.mode_state[&mode].clone()),
            json!({"sort": "desc"})
        );
    }

    #[test]
    fn test_switch_mode_resets_viewport() {
        let state = Arc::new(EditorState::default());
        let state = reduce(
            &state,
            &Action::SetViewport {
                viewport: Viewport::default().with_zoom(2.0),
            },
        );
        let state = reduce(
            &state,
            &Action::SwitchMode {
                mode: AdapterKind::CANVAS,
            },
        );
        assert_eq!(state.mode, AdapterKind::CANVAS);
        assert_eq!(state.viewport, Viewport::default());
    }

    #[test]
    fn test_load_clears_dirty() {
        let state = Arc::new(EditorState::default());
        let state = reduce(&state, &Action::DocumentChanged { ast: doc(&["a"]) });
        let state = reduce(
            &state,
            &Action::Load {
                content_ref: Some(ContentRef::new("doc-1")),
                ast: doc(&["z"]),
            },
        );
        assert!(!state.dirty);
        assert_eq!(state.content_ref, Some(ContentRef::new("doc-1")));
    }

    #[test]
    fn test_store_reports_changes() {
        let mut store = StateStore::default();
        assert!(!store.dispatch(&Action::other("noop", Value::Null)));
        assert!(store.dispatch(&Action::DocumentChanged { ast: doc(&["a"]) }));
        assert_eq!(store.dispatched(), 2);
        assert!(store.state().dirty);
    }
}
