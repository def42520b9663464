//! Undo/redo over root snapshots.

use std::collections::VecDeque;
use std::mem;

use crate::core::config::DagConfig;
use crate::core::types::Result;
use crate::voxel::dag::{Payload, SvdagIndex};
use super::delta::EditOp;

/// Linear edit history. Each entry pairs an operation with the root that was
/// current before (undo stack) or after (redo stack) it.
pub struct EditHistory<P: Payload> {
    current: SvdagIndex<P>,
    undo: VecDeque<(SvdagIndex<P>, EditOp<P>)>,
    redo: Vec<(SvdagIndex<P>, EditOp<P>)>,
    limit: usize,
}

impl<P: Payload> EditHistory<P> {
    /// Start a history at `index`, keeping at most `limit` undo steps
    pub fn new(index: SvdagIndex<P>, limit: usize) -> Self {
        Self {
            current: index,
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit,
        }
    }

    pub fn from_config(index: SvdagIndex<P>, config: &DagConfig) -> Self {
        Self::new(index, config.history_limit)
    }

    /// Current root
    pub fn current(&self) -> &SvdagIndex<P> {
        &self.current
    }

    /// Apply an edit. Returns `false` (and records nothing) when the edit left
    /// the volume unchanged. Clears the redo stack otherwise.
    pub fn apply(&mut self, op: EditOp<P>) -> Result<bool> {
        let next = op.apply_to(&self.current)?;
        if next.same_root(&self.current) {
            log::debug!("Edit {:?} left the volume unchanged", op);
            return Ok(false);
        }

        let previous = mem::replace(&mut self.current, next);
        self.redo.clear();
        self.undo.push_back((previous, op));
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
        Ok(true)
    }

    /// Step back one edit. Returns the undone operation.
    pub fn undo(&mut self) -> Option<EditOp<P>> {
        let (previous, op) = self.undo.pop_back()?;
        let newer = mem::replace(&mut self.current, previous);
        self.redo.push((newer, op));
        Some(op)
    }

    /// Re-apply the last undone edit. Returns the redone operation.
    pub fn redo(&mut self) -> Option<EditOp<P>> {
        let (newer, op) = self.redo.pop()?;
        let previous = mem::replace(&mut self.current, newer);
        self.undo.push_back((previous, op));
        Some(op)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Drop all snapshots except the current root
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Consume the history, keeping only the current root
    pub fn into_current(self) -> SvdagIndex<P> {
        self.current
    }
}
