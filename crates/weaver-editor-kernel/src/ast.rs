//! Canonical document tree.
//!
//! The AST is rendering-technology independent: every view adapter renders
//! from the same [`DocumentAst`], and every structural edit lands here first.
//!
//! Nodes are stored flat in an id index; each node lists its children by id.
//! A parent index is maintained alongside so ancestry checks don't need a
//! tree walk from the root.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

use crate::error::StructuralError;

/// Id of the root node in a freshly created document.
pub const ROOT_ID: &str = "root";

/// Node type of the root node in a freshly created document.
pub const ROOT_KIND: &str = "doc";

/// Node type used for text blocks created from plain content.
pub const PARAGRAPH_KIND: &str = "paragraph";

/// Attribute map. Ordered so serialisation is deterministic.
pub type Attrs = BTreeMap<SmolStr, Value>;

/// Unique identifier of a node within one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(SmolStr);

impl NodeId {
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the root node of a freshly created document.
    pub fn root() -> Self {
        Self(SmolStr::new_static(ROOT_ID))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<SmolStr> for NodeId {
    fn from(s: SmolStr) -> Self {
        Self(s)
    }
}

/// A single node of the document tree.
#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub id: NodeId,
    /// Type tag (`paragraph`, `heading`, `graph-edge`, ...).
    pub kind: SmolStr,
    pub attrs: Attrs,
    /// Ordered child ids.
    pub children: Vec<NodeId>,
    /// Optional text payload.
    pub text: Option<String>,
}

impl AstNode {
    pub fn new(id: impl Into<NodeId>, kind: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs: Attrs::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// A paragraph carrying `text`.
    pub fn paragraph(id: impl Into<NodeId>, text: impl Into<String>) -> Self {
        Self::new(id, PARAGRAPH_KIND).with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Adopt existing nodes as children on insert.
    pub fn with_children(mut self, children: impl IntoIterator<Item = NodeId>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }
}

/// Partial update for a node. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub kind: Option<SmolStr>,
    /// `Some(value)` sets, `None` removes.
    pub attrs: BTreeMap<SmolStr, Option<Value>>,
    /// `Some(Some(text))` sets, `Some(None)` clears.
    pub text: Option<Option<String>>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: impl Into<SmolStr>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn attr(mut self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove_attr(mut self, key: impl Into<SmolStr>) -> Self {
        self.attrs.insert(key.into(), None);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(Some(text.into()));
        self
    }

    pub fn clear_text(mut self) -> Self {
        self.text = Some(None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.attrs.is_empty() && self.text.is_none()
    }

    /// Apply to `node`. Returns true if anything actually changed.
    pub fn apply(&self, node: &mut AstNode) -> bool {
        let mut changed = false;
        if let Some(kind) = &self.kind {
            if node.kind != *kind {
                node.kind = kind.clone();
                changed = true;
            }
        }
        for (key, value) in &self.attrs {
            match value {
                Some(value) => {
                    if node.attrs.get(key) != Some(value) {
                        node.attrs.insert(key.clone(), value.clone());
                        changed = true;
                    }
                }
                None => changed |= node.attrs.remove(key).is_some(),
            }
        }
        if let Some(text) = &self.text {
            if node.text != *text {
                node.text = text.clone();
                changed = true;
            }
        }
        changed
    }
}

/// Wire format: a nested `{id, type, attrs, children, text?}` tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: SmolStr,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<SerializedNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl SerializedNode {
    pub fn new(id: impl Into<NodeId>, kind: impl Into<SmolStr>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            attrs: Attrs::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<SmolStr>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: SerializedNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn to_json(&self) -> Result<String, StructuralError> {
        serde_json::to_string(self).map_err(|e| StructuralError::Malformed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, StructuralError> {
        serde_json::from_str(json).map_err(|e| StructuralError::Malformed(e.to_string()))
    }
}

/// The document tree plus its id and parent indexes.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAst {
    pub(crate) root: NodeId,
    pub(crate) nodes: HashMap<NodeId, AstNode>,
    pub(crate) parents: HashMap<NodeId, NodeId>,
}

impl Default for DocumentAst {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentAst {
    /// An empty document: a lone `doc` root.
    pub fn new() -> Self {
        Self::with_root(AstNode::new(NodeId::root(), ROOT_KIND))
    }

    /// A document consisting of `root` only. Any children listed on `root`
    /// are dropped.
    pub fn with_root(mut root: AstNode) -> Self {
        root.children.clear();
        let id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(id.clone(), root);
        Self {
            root: id,
            nodes,
            parents: HashMap::new(),
        }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    pub fn root(&self) -> &AstNode {
        // The root is inserted at construction and can never be removed.
        &self.nodes[&self.root]
    }

    pub fn get(&self, id: &NodeId) -> Option<&AstNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn parent_of(&self, id: &NodeId) -> Option<&NodeId> {
        self.parents.get(id)
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// True if `ancestor` is `node` or lies on its path to the root.
    pub fn is_ancestor_or_self(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parents.get(id);
        }
        false
    }

    /// Pre-order walk of the subtree rooted at `id`, `id` included.
    pub fn descendants(&self, id: &NodeId) -> Vec<&AstNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&NodeId> = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.nodes.get(next) else {
                continue;
            };
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Text payloads in document order, one line per text-bearing node.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        for node in self.descendants(&self.root) {
            if let Some(text) = &node.text {
                parts.push(text.as_str());
            }
        }
        parts.join("\n")
    }

    /// Ids reachable from the root by following child lists.
    pub fn reachable_ids(&self) -> HashSet<NodeId> {
        self.descendants(&self.root)
            .into_iter()
            .map(|n| n.id.clone())
            .collect()
    }

    /// Verify the index invariants: the id index holds exactly the nodes
    /// reachable from the root, and every non-root node has exactly one parent.
    pub fn check_integrity(&self) -> Result<(), StructuralError> {
        let mut seen_as_child: HashMap<&NodeId, usize> = HashMap::new();
        for node in self.nodes.values() {
            for child in &node.children {
                *seen_as_child.entry(child).or_default() += 1;
                if self.parents.get(child) != Some(&node.id) {
                    return Err(StructuralError::Malformed(format!(
                        "parent index for {child} does not point at {}",
                        node.id
                    )));
                }
            }
        }
        if let Some((id, _)) = seen_as_child.iter().find(|(_, n)| **n > 1) {
            return Err(StructuralError::Malformed(format!(
                "{id} has more than one parent"
            )));
        }
        if seen_as_child.contains_key(&self.root) {
            return Err(StructuralError::Malformed("root has a parent".into()));
        }
        let reachable = self.reachable_ids();
        if reachable.len() != self.nodes.len()
            || self.nodes.keys().any(|id| !reachable.contains(id))
        {
            return Err(StructuralError::Malformed(
                "id index does not match the reachable tree".into(),
            ));
        }
        if self.parents.len() != self.nodes.len() - 1 {
            return Err(StructuralError::Malformed("stale parent index".into()));
        }
        Ok(())
    }

    /// Export as a nested tree.
    pub fn serialize(&self) -> SerializedNode {
        self.serialize_node(&self.root)
    }

    fn serialize_node(&self, id: &NodeId) -> SerializedNode {
        let node = &self.nodes[id];
        SerializedNode {
            id: node.id.clone(),
            kind: node.kind.clone(),
            attrs: node.attrs.clone(),
            children: node
                .children
                .iter()
                .map(|child| self.serialize_node(child))
                .collect(),
            text: node.text.clone(),
        }
    }

    /// Build a document from a nested tree. Ids must be unique.
    pub fn deserialize(tree: &SerializedNode) -> Result<Self, StructuralError> {
        let mut nodes = HashMap::new();
        let mut parents = HashMap::new();
        let mut stack: Vec<(&SerializedNode, Option<&NodeId>)> = vec![(tree, None)];

        while let Some((current, parent)) = stack.pop() {
            if nodes.contains_key(&current.id) {
                return Err(StructuralError::DuplicateId(current.id.clone()));
            }
            if let Some(parent) = parent {
                parents.insert(current.id.clone(), parent.clone());
            }
            nodes.insert(
                current.id.clone(),
                AstNode {
                    id: current.id.clone(),
                    kind: current.kind.clone(),
                    attrs: current.attrs.clone(),
                    children: current.children.iter().map(|c| c.id.clone()).collect(),
                    text: current.text.clone(),
                },
            );
            for child in current.children.iter().rev() {
                stack.push((child, Some(&current.id)));
            }
        }

        Ok(Self {
            root: tree.id.clone(),
            nodes,
            parents,
        })
    }
}
