//! History service — the per-room operation log and its undo/redo machine.
//!
//! DESIGN
//! ======
//! The log is a strict linear history: two stacks, committed operations and
//! undone operations. Appending new work clears the redo stack, so there is
//! never a branching history to reconcile. Undo and redo on an empty stack
//! are no-ops signalled by `None`; the caller suppresses the broadcast.
//!
//! Room-level entry points take the registry write lock, mutate, and return
//! the resulting full snapshot. Holding the lock across mutate + snapshot is
//! what gives every mutation its place in the room's total order.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::services::room;
use crate::state::{AppState, StrokeOp};

// =============================================================================
// OPERATION LOG
// =============================================================================

/// Authoritative, linearly ordered stroke history with an undo/redo buffer.
///
/// Invariant: an operation lives in `operations` or `redo_stack`, never both,
/// and nothing is lost — undo/redo only move the tail between the two.
#[derive(Debug, Default)]
pub struct OperationLog {
    operations: Vec<StrokeOp>,
    redo_stack: Vec<StrokeOp>,
}

impl OperationLog {
    #[must_use]
    pub fn new() -> Self {
        Self { operations: Vec::new(), redo_stack: Vec::new() }
    }

    /// Commit an operation. New work invalidates the redo branch.
    pub fn append(&mut self, op: StrokeOp) {
        self.operations.push(op);
        self.redo_stack.clear();
    }

    /// Move the most recent operation onto the redo stack. Returns the moved
    /// operation, or `None` when the log is empty (no side effect).
    pub fn undo(&mut self) -> Option<&StrokeOp> {
        let op = self.operations.pop()?;
        self.redo_stack.push(op);
        self.redo_stack.last()
    }

    /// Move the most recently undone operation back into the log. Returns the
    /// moved operation, or `None` when the redo stack is empty.
    pub fn redo(&mut self) -> Option<&StrokeOp> {
        let op = self.redo_stack.pop()?;
        self.operations.push(op);
        self.operations.last()
    }

    /// Owned copy of the committed operations, in commit order. Callers can
    /// never reach the log's internal storage through the returned value.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StrokeOp> {
        self.operations.clone()
    }

    /// Number of committed operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if no operations are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations available to redo.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }
}

// =============================================================================
// ROOM-LEVEL OPERATIONS
// =============================================================================

/// Commit a finished stroke to a room's history and return the resulting
/// snapshot for broadcast. Stamps the commit time when the client left the
/// timestamp at 0.
pub async fn commit_stroke(state: &AppState, room_key: &str, mut stroke: StrokeOp) -> Vec<StrokeOp> {
    if stroke.ts == 0 {
        stroke.ts = now_ms();
    }

    let mut rooms = state.rooms.write().await;
    let room_state = room::room_entry(&mut rooms, room_key);
    room_state.history.append(stroke);
    info!(room = room_key, ops = room_state.history.len(), "stroke committed");
    room_state.history.snapshot()
}

/// Undo the most recent operation in a room. Returns the resulting snapshot,
/// or `None` when the log was empty (caller broadcasts nothing).
pub async fn undo(state: &AppState, room_key: &str) -> Option<Vec<StrokeOp>> {
    let mut rooms = state.rooms.write().await;
    let room_state = room::room_entry(&mut rooms, room_key);
    room_state.history.undo()?;
    info!(
        room = room_key,
        ops = room_state.history.len(),
        redoable = room_state.history.redo_len(),
        "undo applied"
    );
    Some(room_state.history.snapshot())
}

/// Redo the most recently undone operation in a room. Returns the resulting
/// snapshot, or `None` when the redo stack was empty.
pub async fn redo(state: &AppState, room_key: &str) -> Option<Vec<StrokeOp>> {
    let mut rooms = state.rooms.write().await;
    let room_state = room::room_entry(&mut rooms, room_key);
    room_state.history.redo()?;
    info!(
        room = room_key,
        ops = room_state.history.len(),
        redoable = room_state.history.redo_len(),
        "redo applied"
    );
    Some(room_state.history.snapshot())
}

/// Current time as milliseconds since Unix epoch.
fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
