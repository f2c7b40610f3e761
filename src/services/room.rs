//! Room service — registry lookup, join/part, and broadcast.
//!
//! DESIGN
//! ======
//! Rooms are created lazily on first reference and retained for the process
//! lifetime: a room with zero users keeps its history so returning clients
//! see the same canvas. Memory therefore grows with the number of distinct
//! rooms and their stroke counts — a stated scope limitation of this
//! in-memory, best-effort service, not something this layer papers over.
//!
//! Join and part mutate the client and presence maps and take their
//! snapshots under a single write-lock acquisition, so membership changes
//! get the same total ordering as history mutations.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::services::presence;
use crate::state::{AppState, RoomState, StrokeOp, UserInfo};

// =============================================================================
// REGISTRY
// =============================================================================

/// Look up a room's state, creating an empty one on first reference.
/// Idempotent; the key is opaque and already normalized by the caller.
pub fn room_entry<'a>(rooms: &'a mut HashMap<String, RoomState>, room_key: &str) -> &'a mut RoomState {
    rooms.entry(room_key.to_owned()).or_default()
}

// =============================================================================
// JOIN / PART
// =============================================================================

/// Join a room: register the outgoing channel and the presence entry, and
/// return the history and presence snapshots taken in the same critical
/// section, so the joiner's `history:init` and the room's `users:update`
/// reflect one consistent point in the room's order.
pub async fn join_room(
    state: &AppState,
    room_key: &str,
    client_id: Uuid,
    info: UserInfo,
    tx: mpsc::Sender<ServerMessage>,
) -> (Vec<StrokeOp>, HashMap<Uuid, UserInfo>) {
    let mut rooms = state.rooms.write().await;
    let room_state = room_entry(&mut rooms, room_key);

    room_state.clients.insert(client_id, tx);
    presence::add_user(room_state, client_id, info);

    info!(%client_id, room = room_key, clients = room_state.clients.len(), "client joined room");
    (room_state.history.snapshot(), presence::users_snapshot(room_state))
}

/// Leave a room: remove the channel and presence entry. Returns the departed
/// user's identity and the remaining presence snapshot, or `None` if the
/// connection was not registered. The room itself is never evicted.
pub async fn part_room(
    state: &AppState,
    room_key: &str,
    client_id: Uuid,
) -> Option<(UserInfo, HashMap<Uuid, UserInfo>)> {
    let mut rooms = state.rooms.write().await;
    let room_state = rooms.get_mut(room_key)?;

    room_state.clients.remove(&client_id);
    let info = presence::remove_user(room_state, client_id)?;

    info!(%client_id, room = room_key, remaining = room_state.clients.len(), "client left room");
    Some((info, presence::users_snapshot(room_state)))
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a message to all clients in a room, optionally excluding one.
pub async fn broadcast(state: &AppState, room_key: &str, msg: &ServerMessage, exclude: Option<Uuid>) {
    let rooms = state.rooms.read().await;
    let Some(room_state) = rooms.get(room_key) else {
        return;
    };

    for (client_id, tx) in &room_state.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        let _ = tx.try_send(msg.clone());
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
