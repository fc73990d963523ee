//! Undo/redo management for document edits.
//!
//! [`UndoManager`] is what the kernel's history commands drive. The
//! document model implements it on top of [`SnapshotHistory`], one
//! whole-tree snapshot per step.
//!
//! Snapshots are cheap because the document model hands out `Arc`-shared
//! trees; an unchanged tree costs one pointer per history step.

/// Undo/redo over some owned state.
///
/// `undo` and `redo` apply the step themselves and report whether there was
/// one to apply.
pub trait UndoManager {
    fn can_undo(&self) -> bool;

    fn can_redo(&self) -> bool;

    fn undo(&mut self) -> bool;

    fn redo(&mut self) -> bool;

    /// Forget every recorded step in both directions.
    fn clear_history(&mut self);
}

/// Bounded undo/redo stacks of snapshots.
///
/// Callers record the state *before* each edit. Undo swaps the current state
/// for the most recent recorded one and pushes the current state onto the
/// redo stack.
#[derive(Debug, Clone)]
pub struct SnapshotHistory<T> {
    undo_stack: Vec<T>,
    redo_stack: Vec<T>,
    max_steps: usize,
}

impl<T> Default for SnapshotHistory<T> {
    fn default() -> Self {
        Self::new(100)
    }
}

impl<T> SnapshotHistory<T> {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_steps,
        }
    }

    /// Record the state before an edit.
    pub fn record(&mut self, before: T) {
        if self.max_steps == 0 {
            return;
        }
        // New edit invalidates anything undone so far.
        self.redo_stack.clear();
        self.undo_stack.push(before);
        if self.undo_stack.len() > self.max_steps {
            let excess = self.undo_stack.len() - self.max_steps;
            self.undo_stack.drain(..excess);
        }
    }

    /// Step back: returns the state to restore, taking `current` for redo.
    pub fn undo(&mut self, current: T) -> Option<T> {
        let previous = self.undo_stack.pop()?;
        self.redo_stack.push(current);
        Some(previous)
    }

    /// Step forward: returns the state to restore, taking `current` for undo.
    pub fn redo(&mut self, current: T) -> Option<T> {
        let next = self.redo_stack.pop()?;
        self.undo_stack.push(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
