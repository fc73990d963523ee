//! External collaborators: persistence and the AI backend.
//!
//! The kernel only knows these contracts. Both return boxed `'static`
//! futures so implementations can be shared as trait objects and awaited
//! after the calling command handler has returned. Retry policy belongs to
//! whoever calls them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, Either, select};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::ast::{DocumentAst, NodeId, SerializedNode};
use crate::cancel::CancellationToken;
use crate::document::DocumentModel;
use crate::error::{CommandError, ExternalError, StructuralError};
use crate::state::EditorState;
use crate::types::ContentRef;

/// The collaborators a kernel was built with.
#[derive(Clone, Default)]
pub struct Services {
    pub persistence: Option<Arc<dyn Persistence>>,
    pub ai: Option<Arc<dyn AiBackend>>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("persistence", &self.persistence.is_some())
            .field("ai", &self.ai.is_some())
            .finish()
    }
}

/// What gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub content_ref: Option<ContentRef>,
    /// Editor revision the snapshot was taken at. Echo it back through
    /// `acknowledge_saved` to clear the dirty flag.
    pub revision: u64,
    pub root: SerializedNode,
}

impl DocumentSnapshot {
    pub fn new(content_ref: Option<ContentRef>, revision: u64, root: SerializedNode) -> Self {
        Self {
            content_ref,
            revision,
            root,
        }
    }

    pub fn capture(doc: &DocumentModel, state: &EditorState) -> Self {
        Self::new(state.content_ref.clone(), state.revision, doc.serialize())
    }

    pub fn to_ast(&self) -> Result<DocumentAst, StructuralError> {
        DocumentAst::deserialize(&self.root)
    }

    /// Text payloads in document order, one line per text-bearing node.
    pub fn text(&self) -> String {
        fn walk<'a>(node: &'a SerializedNode, out: &mut Vec<&'a str>) {
            if let Some(text) = &node.text {
                out.push(text);
            }
            for child in &node.children {
                walk(child, out);
            }
        }
        let mut parts = Vec::new();
        walk(&self.root, &mut parts);
        parts.join("\n")
    }
}

/// Save/load contract.
pub trait Persistence: Send + Sync {
    fn save(&self, snapshot: DocumentSnapshot) -> BoxFuture<'static, Result<(), ExternalError>>;

    fn load(&self, content_ref: &ContentRef)
    -> BoxFuture<'static, Result<DocumentSnapshot, ExternalError>>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    documents: HashMap<ContentRef, DocumentSnapshot>,
    saves: Vec<DocumentSnapshot>,
}

/// In-memory [`Persistence`]. Keeps every save for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Key used for snapshots without a content reference.
    pub const UNTITLED: &'static str = "untitled";

    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, content_ref: ContentRef, root: SerializedNode) {
        let snapshot = DocumentSnapshot::new(Some(content_ref.clone()), 0, root);
        self.lock().documents.insert(content_ref, snapshot);
    }

    pub fn get(&self, content_ref: &ContentRef) -> Option<DocumentSnapshot> {
        self.lock().documents.get(content_ref).cloned()
    }

    /// Every snapshot saved so far, oldest first.
    pub fn saves(&self) -> Vec<DocumentSnapshot> {
        self.lock().saves.clone()
    }

    pub fn save_count(&self) -> usize {
        self.lock().saves.len()
    }
}

impl Persistence for MemoryStore {
    fn save(&self, snapshot: DocumentSnapshot) -> BoxFuture<'static, Result<(), ExternalError>> {
        let key = snapshot
            .content_ref
            .clone()
            .unwrap_or_else(|| ContentRef::new(Self::UNTITLED));
        debug!(content_ref = %key, revision = snapshot.revision, "memory store save");
        let mut inner = self.lock();
        inner.saves.push(snapshot.clone());
        inner.documents.insert(key, snapshot);
        Box::pin(async { Ok(()) })
    }

    fn load(
        &self,
        content_ref: &ContentRef,
    ) -> BoxFuture<'static, Result<DocumentSnapshot, ExternalError>> {
        let found = self
            .get(content_ref)
            .ok_or_else(|| ExternalError::NotFound(content_ref.to_string()));
        Box::pin(async move { found })
    }
}

/// AI completion contract.
pub trait AiBackend: Send + Sync {
    /// Continue `context` at character offset `cursor`.
    fn request_completion(
        &self,
        context: String,
        cursor: usize,
    ) -> BoxFuture<'static, Result<String, ExternalError>>;

    fn request_rewrite(
        &self,
        content: String,
        style: String,
    ) -> BoxFuture<'static, Result<String, ExternalError>>;

    fn request_summary(
        &self,
        content: String,
        max_words: Option<u32>,
    ) -> BoxFuture<'static, Result<String, ExternalError>>;
}

/// One AI operation. Closed: anything else is rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AiRequest {
    Completion {
        context: String,
        cursor: usize,
    },
    Rewrite {
        content: String,
        style: String,
        /// Node whose text receives the result when `apply` is set.
        #[serde(default)]
        target: Option<NodeId>,
        #[serde(default)]
        apply: bool,
    },
    Summary {
        content: String,
        #[serde(default)]
        max_words: Option<u32>,
    },
}

impl AiRequest {
    const OPS: [&'static str; 3] = ["completion", "rewrite", "summary"];

    /// Parse a loosely-shaped payload. An unknown `op` is
    /// [`ExternalError::UnsupportedOperation`]; a known op with bad fields is
    /// [`CommandError::InvalidPayload`].
    pub fn from_value(payload: Value) -> Result<Self, CommandError> {
        let op = payload
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| CommandError::InvalidPayload("missing \"op\"".into()))?;
        if !Self::OPS.contains(&op) {
            return Err(ExternalError::UnsupportedOperation(op.to_string()).into());
        }
        crate::command::parse_payload(payload)
    }

    pub fn op(&self) -> &'static str {
        match self {
            Self::Completion { .. } => "completion",
            Self::Rewrite { .. } => "rewrite",
            Self::Summary { .. } => "summary",
        }
    }

    pub fn send(self, backend: &dyn AiBackend) -> BoxFuture<'static, Result<String, ExternalError>> {
        match self {
            Self::Completion { context, cursor } => backend.request_completion(context, cursor),
            Self::Rewrite { content, style, .. } => backend.request_rewrite(content, style),
            Self::Summary { content, max_words } => backend.request_summary(content, max_words),
        }
    }
}

/// Race `fut` against `token`. Cancelling after completion has no effect.
pub async fn cancellable<T>(
    fut: BoxFuture<'static, Result<T, ExternalError>>,
    token: CancellationToken,
) -> Result<T, ExternalError> {
    let cancelled = Box::pin(async move { token.cancelled().await });
    match select(fut, cancelled).await {
        Either::Left((result, _)) => result,
        Either::Right((reason, _)) => Err(ExternalError::Cancelled(reason.to_string())),
    }
}
