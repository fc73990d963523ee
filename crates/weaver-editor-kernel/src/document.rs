//! The document model: sole owner of the canonical AST.
//!
//! Every structural mutation goes through [`DocumentModel`], which keeps the
//! child lists, the id index and the parent index in step. Operations validate
//! fully before touching anything, so a failed operation leaves the tree
//! exactly as it was.
//!
//! Each successful mutation records a [`DocumentChange`]. The kernel drains
//! these after every action and feeds them to the state store and the active
//! adapter's incremental `update`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::ast::{AstNode, DocumentAst, NodeId, NodePatch, PARAGRAPH_KIND, SerializedNode};
use crate::error::StructuralError;
use crate::history::{SnapshotHistory, UndoManager};

/// A structural change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentChange {
    Inserted {
        id: NodeId,
        parent: NodeId,
        index: usize,
    },
    Removed {
        id: NodeId,
        parent: NodeId,
        /// The removed node and all its descendants.
        removed: Vec<NodeId>,
    },
    Updated {
        id: NodeId,
    },
    Moved {
        id: NodeId,
        from: NodeId,
        to: NodeId,
        index: usize,
    },
    /// The whole tree was swapped out (load, set-content, undo/redo).
    Replaced,
}

impl DocumentChange {
    /// Nodes whose rendering is affected, or `None` if everything is.
    pub fn touched(&self) -> Option<Vec<&NodeId>> {
        match self {
            Self::Inserted { id, parent, .. } => Some(vec![id, parent]),
            Self::Removed { parent, .. } => Some(vec![parent]),
            Self::Updated { id } => Some(vec![id]),
            Self::Moved { id, from, to, .. } => Some(vec![id, from, to]),
            Self::Replaced => None,
        }
    }
}

/// Document-level operations.
///
/// These represent semantic edits on the tree, decoupled from how they were
/// triggered (keystroke, command, plugin, API call).
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAction {
    /// Replace the document body with plain text, one paragraph per line.
    SetContent { text: String },
    InsertNode {
        node: AstNode,
        parent: NodeId,
        index: usize,
    },
    /// Remove a node and all its descendants.
    RemoveNode { id: NodeId },
    UpdateNode { id: NodeId, patch: NodePatch },
    MoveNode {
        id: NodeId,
        parent: NodeId,
        index: usize,
    },
    /// Replace the whole tree.
    Replace { tree: SerializedNode },
    Undo,
    Redo,
}

impl DocumentAction {
    pub fn set_content(text: impl Into<String>) -> Self {
        Self::SetContent { text: text.into() }
    }

    pub fn insert(node: AstNode, parent: impl Into<NodeId>, index: usize) -> Self {
        Self::InsertNode {
            node,
            parent: parent.into(),
            index,
        }
    }

    pub fn remove(id: impl Into<NodeId>) -> Self {
        Self::RemoveNode { id: id.into() }
    }

    pub fn update(id: impl Into<NodeId>, patch: NodePatch) -> Self {
        Self::UpdateNode {
            id: id.into(),
            patch,
        }
    }

    /// Whether this action goes on the undo stack.
    fn is_recorded(&self) -> bool {
        !matches!(self, Self::Undo | Self::Redo)
    }
}

/// Execute a document action.
///
/// This is the central dispatch point for all structural edits.
/// Returns true if the document was modified.
pub fn execute_document_action(
    doc: &mut DocumentModel,
    action: &DocumentAction,
) -> Result<bool, StructuralError> {
    let before = doc.snapshot();
    let changed = match action {
        DocumentAction::SetContent { text } => {
            doc.set_text(text);
            true
        }
        DocumentAction::InsertNode {
            node,
            parent,
            index,
        } => doc.insert_node(node.clone(), parent, *index).map(|_| true)?,
        DocumentAction::RemoveNode { id } => doc.remove_node(id).map(|_| true)?,
        DocumentAction::UpdateNode { id, patch } => doc.update_node(id, patch)?,
        DocumentAction::MoveNode { id, parent, index } => {
            doc.move_node(id, parent, *index).map(|_| true)?
        }
        DocumentAction::Replace { tree } => doc.replace(tree).map(|_| true)?,
        DocumentAction::Undo => doc.undo(),
        DocumentAction::Redo => doc.redo(),
    };
    if changed && action.is_recorded() {
        doc.history.record(before);
    }
    Ok(changed)
}

/// Owns the canonical AST, its indexes, edit history and pending change
/// notifications.
#[derive(Debug)]
pub struct DocumentModel {
    ast: Arc<DocumentAst>,
    history: SnapshotHistory<Arc<DocumentAst>>,
    changes: Vec<DocumentChange>,
    next_id: u64,
}

impl Default for DocumentModel {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentModel {
    /// An empty document.
    pub fn new() -> Self {
        Self::from_ast(DocumentAst::new())
    }

    pub fn from_ast(ast: DocumentAst) -> Self {
        Self {
            ast: Arc::new(ast),
            history: SnapshotHistory::default(),
            changes: Vec::new(),
            next_id: 1,
        }
    }

    /// Build from the nested wire format.
    pub fn deserialize(tree: &SerializedNode) -> Result<Self, StructuralError> {
        Ok(Self::from_ast(DocumentAst::deserialize(tree)?))
    }

    pub fn with_history_limit(mut self, max_steps: usize) -> Self {
        self.history = SnapshotHistory::new(max_steps);
        self
    }

    pub fn serialize(&self) -> SerializedNode {
        self.ast.serialize()
    }

    /// A cheap immutable snapshot of the current tree.
    pub fn snapshot(&self) -> Arc<DocumentAst> {
        Arc::clone(&self.ast)
    }

    pub fn ast(&self) -> &DocumentAst {
        &self.ast
    }

    pub fn root_id(&self) -> &NodeId {
        self.ast.root_id()
    }

    pub fn node(&self, id: &NodeId) -> Option<&AstNode> {
        self.ast.get(id)
    }

    pub fn get_node(&self, id: &NodeId) -> Result<&AstNode, StructuralError> {
        self.ast
            .get(id)
            .ok_or_else(|| StructuralError::NotFound(id.clone()))
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.ast.parent_of(id)
    }

    pub fn children_of(&self, id: &NodeId) -> Result<&[NodeId], StructuralError> {
        Ok(&self.get_node(id)?.children)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.ast.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    pub fn text(&self) -> String {
        self.ast.text()
    }

    /// Drain structural change notifications recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<DocumentChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// A node id not currently present in the document.
    pub fn fresh_id(&mut self) -> NodeId {
        loop {
            let id = NodeId::from(format!("n{}", self.next_id));
            self.next_id += 1;
            if !self.ast.contains(&id) {
                return id;
            }
        }
    }

    /// Insert `node` as child `index` of `parent`.
    ///
    /// Any ids listed in `node.children` must already exist; those nodes (with
    /// their subtrees) are re-parented under the new node. Fails with
    /// [`StructuralError::Cycle`] if an adopted child is `parent` or one of its
    /// ancestors.
    pub fn insert_node(
        &mut self,
        node: AstNode,
        parent: &NodeId,
        index: usize,
    ) -> Result<(), StructuralError> {
        if self.ast.contains(&node.id) {
            return Err(StructuralError::DuplicateId(node.id));
        }
        let parent_node = self.get_node(parent)?;

        let mut adopted = HashSet::new();
        for child in &node.children {
            if !self.ast.contains(child) {
                return Err(StructuralError::NotFound(child.clone()));
            }
            if child == self.ast.root_id() {
                return Err(StructuralError::RootImmutable);
            }
            if !adopted.insert(child) {
                return Err(StructuralError::DuplicateId(child.clone()));
            }
            if self.ast.is_ancestor_or_self(child, parent) {
                return Err(StructuralError::Cycle {
                    node: child.clone(),
                    parent: node.id.clone(),
                });
            }
        }

        let remaining = parent_node
            .children
            .iter()
            .filter(|c| !adopted.contains(c))
            .count();
        if index > remaining {
            return Err(StructuralError::IndexOutOfBounds {
                parent: parent.clone(),
                index,
                len: remaining,
            });
        }

        let ast = Arc::make_mut(&mut self.ast);
        for child in &node.children {
            ast.detach(child);
            ast.parents.insert(child.clone(), node.id.clone());
        }
        let id = node.id.clone();
        ast.parents.insert(id.clone(), parent.clone());
        ast.nodes.insert(id.clone(), node);
        if let Some(p) = ast.nodes.get_mut(parent) {
            p.children.insert(index, id.clone());
        }

        debug!(node = %id, parent = %parent, index, "inserted node");
        self.changes.push(DocumentChange::Inserted {
            id,
            parent: parent.clone(),
            index,
        });
        Ok(())
    }

    /// Remove `id` and all of its descendants.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Vec<NodeId>, StructuralError> {
        if id == self.ast.root_id() {
            return Err(StructuralError::RootImmutable);
        }
        self.get_node(id)?;

        let removed: Vec<NodeId> = self
            .ast
            .descendants(id)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();

        let ast = Arc::make_mut(&mut self.ast);
        let parent = ast.detach(id);
        for gone in &removed {
            ast.nodes.remove(gone);
            ast.parents.remove(gone);
        }

        let parent = parent.ok_or_else(|| {
            StructuralError::Malformed(format!("{id} had no parent entry"))
        })?;
        debug!(node = %id, count = removed.len(), "removed subtree");
        self.changes.push(DocumentChange::Removed {
            id: id.clone(),
            parent,
            removed: removed.clone(),
        });
        Ok(removed)
    }

    /// Apply `patch` to a node. Returns true if anything changed.
    pub fn update_node(&mut self, id: &NodeId, patch: &NodePatch) -> Result<bool, StructuralError> {
        self.get_node(id)?;
        let ast = Arc::make_mut(&mut self.ast);
        let changed = match ast.nodes.get_mut(id) {
            Some(node) => patch.apply(node),
            None => false,
        };
        if changed {
            self.changes.push(DocumentChange::Updated { id: id.clone() });
        }
        Ok(changed)
    }

    /// Relocate `id` (with its subtree) to child `index` of `parent`.
    pub fn move_node(
        &mut self,
        id: &NodeId,
        parent: &NodeId,
        index: usize,
    ) -> Result<(), StructuralError> {
        if id == self.ast.root_id() {
            return Err(StructuralError::RootImmutable);
        }
        self.get_node(id)?;
        let target = self.get_node(parent)?;
        if self.ast.is_ancestor_or_self(id, parent) {
            return Err(StructuralError::Cycle {
                node: id.clone(),
                parent: parent.clone(),
            });
        }
        let from = self
            .ast
            .parent_of(id)
            .cloned()
            .ok_or_else(|| StructuralError::Malformed(format!("{id} had no parent entry")))?;

        let len = if from == *parent {
            target.children.len() - 1
        } else {
            target.children.len()
        };
        if index > len {
            return Err(StructuralError::IndexOutOfBounds {
                parent: parent.clone(),
                index,
                len,
            });
        }

        let ast = Arc::make_mut(&mut self.ast);
        ast.detach(id);
        ast.parents.insert(id.clone(), parent.clone());
        if let Some(p) = ast.nodes.get_mut(parent) {
            p.children.insert(index, id.clone());
        }

        self.changes.push(DocumentChange::Moved {
            id: id.clone(),
            from,
            to: parent.clone(),
            index,
        });
        Ok(())
    }

    /// Replace the body with `text`, one paragraph per line. The root keeps
    /// its id, type and attributes.
    pub fn set_text(&mut self, text: &str) {
        let mut root = self.ast.root().clone();
        root.children.clear();
        let mut ast = DocumentAst::with_root(root);

        if !text.is_empty() {
            for line in text.split('\n') {
                let id = loop {
                    let candidate = self.fresh_id();
                    if !ast.contains(&candidate) {
                        break candidate;
                    }
                };
                let root_id = ast.root.clone();
                ast.parents.insert(id.clone(), root_id.clone());
                ast.nodes
                    .insert(id.clone(), AstNode::new(id.clone(), PARAGRAPH_KIND).with_text(line));
                if let Some(r) = ast.nodes.get_mut(&root_id) {
                    r.children.push(id);
                }
            }
        }

        self.ast = Arc::new(ast);
        self.changes.push(DocumentChange::Replaced);
    }

    /// Replace the whole tree from the wire format.
    pub fn replace(&mut self, tree: &SerializedNode) -> Result<(), StructuralError> {
        self.ast = Arc::new(DocumentAst::deserialize(tree)?);
        self.changes.push(DocumentChange::Replaced);
        Ok(())
    }

    /// Swap in a freshly loaded tree and forget history.
    pub fn load(&mut self, ast: DocumentAst) {
        self.ast = Arc::new(ast);
        self.history.clear();
        self.changes.push(DocumentChange::Replaced);
    }

    /// Reset to an empty document and forget history. Used at teardown.
    pub fn clear(&mut self) {
        self.ast = Arc::new(DocumentAst::new());
        self.history.clear();
        self.changes.clear();
    }
}

impl UndoManager for DocumentModel {
    fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn undo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.undo(current) {
            Some(previous) => {
                self.ast = previous;
                self.changes.push(DocumentChange::Replaced);
                true
            }
            None => false,
        }
    }

    fn redo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.redo(current) {
            Some(next) => {
                self.ast = next;
                self.changes.push(DocumentChange::Replaced);
                true
            }
            None => false,
        }
    }

    fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl DocumentAst {
    /// Unlink `id` from its parent's child list and the parent index.
    /// Returns the former parent.
    fn detach(&mut self, id: &NodeId) -> Option<NodeId> {
        let parent = self.parents.remove(id)?;
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| c != id);
        }
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn doc() -> DocumentModel {
        DocumentModel::deserialize(
            &SerializedNode::new("root", "doc")
                .with_child(SerializedNode::new("a", "paragraph").with_text("alpha"))
                .with_child(
                    SerializedNode::new("list", "list")
                        .with_child(SerializedNode::new("i1", "item").with_text("one"))
                        .with_child(SerializedNode::new("i2", "item").with_text("two")),
                ),
        )
        .unwrap()
    }

    fn ids(children: &[NodeId]) -> Vec<&str> {
        children.iter().map(NodeId::as_str).collect()
    }

    #[test]
    fn test_insert_at_index() {
        let mut doc = doc();
        doc.insert_node(AstNode::paragraph("b", "beta"), &"root".into(), 1)
            .unwrap();
        assert_eq!(ids(doc.children_of(&"root".into()).unwrap()), ["a", "b", "list"]);
        assert_eq!(doc.parent_of(&"b".into()), Some(&NodeId::from("root")));
        doc.ast().check_integrity().unwrap();
        assert_eq!(
            doc.take_changes(),
            vec![DocumentChange::Inserted {
                id: "b".into(),
                parent: "root".into(),
                index: 1
            }]
        );
    }

    #[test]
    fn test_insert_errors_leave_tree_untouched() {
        let mut doc = doc();
        let before = doc.serialize();

        assert_eq!(
            doc.insert_node(AstNode::new("x", "p"), &"missing".into(), 0),
            Err(StructuralError::NotFound("missing".into()))
        );
        assert_eq!(
            doc.insert_node(AstNode::new("a", "p"), &"root".into(), 0),
            Err(StructuralError::DuplicateId("a".into()))
        );
        assert_eq!(
            doc.insert_node(AstNode::new("x", "p"), &"root".into(), 9),
            Err(StructuralError::IndexOutOfBounds {
                parent: "root".into(),
                index: 9,
                len: 2
            })
        );
        assert_eq!(doc.serialize(), before);
        assert!(!doc.has_pending_changes());
    }

    #[test]
    fn test_insert_adopting_ancestor_is_cycle() {
        let mut doc = doc();
        // "wrap" under i1 adopting "list" would make list its own ancestor.
        let wrap = AstNode::new("wrap", "group").with_children(["list".into()]);
        assert_eq!(
            doc.insert_node(wrap, &"i1".into(), 0),
            Err(StructuralError::Cycle {
                node: "list".into(),
                parent: "wrap".into()
            })
        );
        doc.ast().check_integrity().unwrap();
    }

    #[test]
    fn test_insert_adopts_children() {
        let mut doc = doc();
        let wrap = AstNode::new("wrap", "group").with_children(["a".into(), "i2".into()]);
        doc.insert_node(wrap, &"root".into(), 0).unwrap();
        assert_eq!(ids(doc.children_of(&"root".into()).unwrap()), ["wrap", "list"]);
        assert_eq!(ids(doc.children_of(&"wrap".into()).unwrap()), ["a", "i2"]);
        assert_eq!(ids(doc.children_of(&"list".into()).unwrap()), ["i1"]);
        doc.ast().check_integrity().unwrap();
    }

    #[test]
    fn test_remove_cascades() {
        let mut doc = doc();
        let removed = doc.remove_node(&"list".into()).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!doc.contains(&"i1".into()));
        assert!(!doc.contains(&"i2".into()));
        assert_eq!(doc.len(), 2);
        doc.ast().check_integrity().unwrap();
    }

    #[test]
    fn test_remove_root_and_missing() {
        let mut doc = doc();
        assert_eq!(
            doc.remove_node(&"root".into()),
            Err(StructuralError::RootImmutable)
        );
        assert_eq!(
            doc.remove_node(&"nope".into()),
            Err(StructuralError::NotFound("nope".into()))
        );
    }

    #[test]
    fn test_update_reports_only_real_changes() {
        let mut doc = doc();
        let patch = NodePatch::new().text("ALPHA");
        assert_eq!(doc.update_node(&"a".into(), &patch), Ok(true));
        assert_eq!(doc.update_node(&"a".into(), &patch), Ok(false));
        assert_eq!(doc.take_changes().len(), 1);
        assert_eq!(
            doc.update_node(&"zz".into(), &patch),
            Err(StructuralError::NotFound("zz".into()))
        );
    }

    #[test]
    fn test_move_into_descendant_is_cycle() {
        let mut doc = doc();
        assert_eq!(
            doc.move_node(&"list".into(), &"i1".into(), 0),
            Err(StructuralError::Cycle {
                node: "list".into(),
                parent: "i1".into()
            })
        );
        doc.move_node(&"i2".into(), &"root".into(), 0).unwrap();
        assert_eq!(ids(doc.children_of(&"root".into()).unwrap()), ["i2", "a", "list"]);
        doc.ast().check_integrity().unwrap();
    }

    #[test]
    fn test_move_within_same_parent() {
        let mut doc = doc();
        doc.move_node(&"i1".into(), &"list".into(), 1).unwrap();
        assert_eq!(ids(doc.children_of(&"list".into()).unwrap()), ["i2", "i1"]);
        assert!(doc.move_node(&"i1".into(), &"list".into(), 2).is_err());
    }

    #[test]
    fn test_set_text_replaces_body() {
        let mut doc = doc();
        doc.set_text("hello\nworld");
        assert_eq!(doc.text(), "hello\nworld");
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.root_id().as_str(), "root");
        doc.ast().check_integrity().unwrap();

        doc.set_text("");
        assert!(doc.is_empty());
    }

    #[test]
    fn test_snapshots_are_isolated_from_later_edits() {
        let mut doc = doc();
        let snap = doc.snapshot();
        doc.remove_node(&"a".into()).unwrap();
        assert!(snap.contains(&"a".into()));
        assert!(!doc.contains(&"a".into()));
    }

    #[test]
    fn test_undo_redo_through_actions() {
        let mut doc = doc();
        let original = doc.serialize();
        assert!(execute_document_action(&mut doc, &DocumentAction::set_content("hi")).unwrap());
        let edited = doc.serialize();

        assert!(execute_document_action(&mut doc, &DocumentAction::Undo).unwrap());
        assert_eq!(doc.serialize(), original);
        assert!(execute_document_action(&mut doc, &DocumentAction::Redo).unwrap());
        assert_eq!(doc.serialize(), edited);
        assert!(!execute_document_action(&mut doc, &DocumentAction::Redo).unwrap());
    }

    #[test]
    fn test_failed_action_not_recorded() {
        let mut doc = doc();
        assert!(execute_document_action(&mut doc, &DocumentAction::remove("missing")).is_err());
        assert!(!doc.can_undo());
    }

    #[test]
    fn test_random_edit_sequences_keep_index_exact() {
        for seed in 0..20u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut doc = DocumentModel::new();
            for step in 0..200 {
                let existing: Vec<NodeId> = doc.ast().ids().cloned().collect();
                let pick = existing[rng.random_range(0..existing.len())].clone();
                if rng.random_bool(0.6) {
                    let len = doc.children_of(&pick).unwrap().len();
                    let index = rng.random_range(0..=len);
                    let node = AstNode::paragraph(format!("s{seed}-{step}"), "x");
                    doc.insert_node(node, &pick, index).unwrap();
                } else {
                    let result = doc.remove_node(&pick);
                    if pick == NodeId::root() {
                        assert_eq!(result, Err(StructuralError::RootImmutable));
                    } else {
                        result.unwrap();
                    }
                }
                doc.ast().check_integrity().unwrap();
                assert_eq!(
                    doc.ast().reachable_ids(),
                    doc.ast().ids().cloned().collect::<HashSet<_>>()
                );
            }
        }
    }
}
