//! Live relay service — ephemeral stroke previews and cursor positions.
//!
//! DESIGN
//! ======
//! In-progress stroke points and pointer positions are broadcast to room
//! peers and immediately forgotten: nothing here touches `RoomState`, and
//! the server never reconstructs an in-flight stroke. The authoritative
//! moment is `stroke:end`, handled by the history service; this split keeps
//! the expensive full-snapshot broadcast to one per completed stroke rather
//! than one per point.

use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::services::room;
use crate::state::{AppState, Point, StrokeOp};

/// Relay a stroke's opening descriptor to all room peers except the sender.
pub async fn relay_stroke_start(state: &AppState, room_key: &str, from: Uuid, stroke: StrokeOp) {
    let msg = ServerMessage::StrokeStart { client_id: from, stroke };
    room::broadcast(state, room_key, &msg, Some(from)).await;
}

/// Relay one incremental point of an in-progress stroke to all room peers
/// except the sender.
pub async fn relay_stroke_update(
    state: &AppState,
    room_key: &str,
    from: Uuid,
    stroke_id: String,
    point: Point,
) {
    let msg = ServerMessage::StrokeUpdate { client_id: from, stroke_id, point };
    room::broadcast(state, room_key, &msg, Some(from)).await;
}

/// Broadcast a cursor position to all room peers except the sender.
pub async fn broadcast_cursor(state: &AppState, room_key: &str, from: Uuid, x: f64, y: f64) {
    let msg = ServerMessage::CursorMove { client_id: from, x, y };
    room::broadcast(state, room_key, &msg, Some(from)).await;
}

#[cfg(test)]
#[path = "live_test.rs"]
mod tests;
