//! Headless reference adapter.
//!
//! Keeps a plain-text "view" of every node in memory and records what the
//! kernel asked of it in a shared [`HeadlessRecorder`]. Used by hosts without a
//! display (servers, CLI tooling) and by the test suites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::{AdapterFactory, CreateFuture, MountContext, ViewAdapter};
use crate::ast::{DocumentAst, NodeId};
use crate::document::DocumentChange;
use crate::error::AdapterError;
use crate::kernel::KernelSender;
use crate::types::{AdapterKind, MountPoint, Selection, Viewport};

#[derive(Debug, Default)]
struct RecorderState {
    mounted: Vec<(AdapterKind, MountPoint)>,
    destroyed: usize,
    renders: Vec<String>,
    updates: Vec<Vec<NodeId>>,
    selection: Option<Selection>,
    viewport: Viewport,
    sink: Option<KernelSender>,
}

/// Shared record of what headless adapters were asked to do.
#[derive(Debug, Clone, Default)]
pub struct HeadlessRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl HeadlessRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Kinds mounted so far, oldest first.
    pub fn mounted(&self) -> Vec<AdapterKind> {
        self.lock().mounted.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn created(&self) -> usize {
        self.lock().mounted.len()
    }

    pub fn destroyed(&self) -> usize {
        self.lock().destroyed
    }

    /// Document text at each full render.
    pub fn renders(&self) -> Vec<String> {
        self.lock().renders.clone()
    }

    pub fn last_render(&self) -> Option<String> {
        self.lock().renders.last().cloned()
    }

    /// Node ids redrawn by each incremental update.
    pub fn updates(&self) -> Vec<Vec<NodeId>> {
        self.lock().updates.clone()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.lock().selection.clone()
    }

    pub fn viewport(&self) -> Viewport {
        self.lock().viewport
    }

    /// The kernel channel handed to the most recent mount.
    pub fn sink(&self) -> Option<KernelSender> {
        self.lock().sink.clone()
    }
}

/// Factory for [`HeadlessAdapter`]s.
#[derive(Debug, Clone, Default)]
pub struct HeadlessFactory {
    recorder: HeadlessRecorder,
    fail: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl HeadlessFactory {
    pub fn new(recorder: HeadlessRecorder) -> Self {
        Self {
            recorder,
            fail: None,
            gate: None,
        }
    }

    /// Every mount fails with `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fail = Some(reason.into());
        self
    }

    /// Mounts wait for a permit on `gate` before completing.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl AdapterFactory for HeadlessFactory {
    fn create(&self, ctx: MountContext) -> CreateFuture {
        let recorder = self.recorder.clone();
        let fail = self.fail.clone();
        let gate = self.gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if let Some(reason) = fail {
                return Err(AdapterError::Mount {
                    kind: ctx.kind,
                    reason,
                });
            }
            {
                let mut state = recorder.lock();
                state.mounted.push((ctx.kind.clone(), ctx.mount.clone()));
                state.sink = Some(ctx.sink.clone());
                state.selection = None;
                state.viewport = Viewport::default();
            }
            Ok(Box::new(HeadlessAdapter {
                kind: ctx.kind,
                recorder,
                view: HashMap::new(),
                selection: None,
                viewport: Viewport::default(),
                focused: false,
            }) as Box<dyn ViewAdapter>)
        })
    }
}

/// In-memory adapter: one rendered line per node.
#[derive(Debug)]
pub struct HeadlessAdapter {
    kind: AdapterKind,
    recorder: HeadlessRecorder,
    view: HashMap<NodeId, String>,
    selection: Option<Selection>,
    viewport: Viewport,
    focused: bool,
}

impl HeadlessAdapter {
    fn draw(ast: &DocumentAst, id: &NodeId) -> Option<String> {
        let node = ast.get(id)?;
        Some(format!(
            "<{}>{}",
            node.kind,
            node.text.as_deref().unwrap_or_default()
        ))
    }

    /// Rendered line for `id`.
    pub fn line(&self, id: &NodeId) -> Option<&str> {
        self.view.get(id).map(String::as_str)
    }
}

impl ViewAdapter for HeadlessAdapter {
    fn kind(&self) -> &AdapterKind {
        &self.kind
    }

    fn render(&mut self, ast: &DocumentAst) -> Result<(), AdapterError> {
        self.view = ast
            .descendants(ast.root_id())
            .into_iter()
            .filter_map(|node| Some((node.id.clone(), Self::draw(ast, &node.id)?)))
            .collect();
        self.recorder.lock().renders.push(ast.text());
        Ok(())
    }

    fn update(&mut self, ast: &DocumentAst, changes: &[DocumentChange]) -> Result<(), AdapterError> {
        let mut redrawn: Vec<NodeId> = Vec::new();
        for change in changes {
            if let DocumentChange::Removed { removed, .. } = change {
                for id in removed {
                    self.view.remove(id);
                }
            }
            let Some(touched) = change.touched() else {
                return self.render(ast);
            };
            for id in touched {
                if let Some(line) = Self::draw(ast, id) {
                    self.view.insert(id.clone(), line);
                    if !redrawn.contains(id) {
                        redrawn.push(id.clone());
                    }
                }
            }
        }
        self.recorder.lock().updates.push(redrawn);
        Ok(())
    }

    fn selection(&self) -> Option<Selection> {
        self.selection.clone()
    }

    fn set_selection(&mut self, selection: Option<&Selection>) -> Result<(), AdapterError> {
        self.selection = selection.cloned();
        self.recorder.lock().selection = self.selection.clone();
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<(), AdapterError> {
        self.viewport = viewport;
        self.recorder.lock().viewport = viewport;
        Ok(())
    }

    fn focus(&mut self) -> Result<(), AdapterError> {
        self.focused = true;
        Ok(())
    }

    fn blur(&mut self) -> Result<(), AdapterError> {
        self.focused = false;
        Ok(())
    }

    fn is_focused(&self) -> bool {
        self.focused
    }

    fn destroy(&mut self) -> Result<(), AdapterError> {
        self.view.clear();
        let mut state = self.recorder.lock();
        state.destroyed += 1;
        state.sink = None;
        Ok(())
    }
}
