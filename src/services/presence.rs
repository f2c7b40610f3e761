//! Presence service — who is in a room, under what name and color.
//!
//! DESIGN
//! ======
//! Presence entries are keyed by connection id and maintained transactionally
//! with connect/disconnect in `services::room`, so the key set always equals
//! the connected clients. Names are display-only; collisions are allowed.
//!
//! Colors are not user-chosen: `color_for` derives a stable hue from the
//! connection id, so identity is visually stable without coordination and
//! any party holding the id can recompute the color. The server's value is
//! authoritative; it is stored here only for replay to newly joining peers.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::services::room;
use crate::state::{AppState, RoomState, UserInfo};

/// Placeholder display name between connect and `user:join`.
pub const ANONYMOUS: &str = "anonymous";

// =============================================================================
// COLOR
// =============================================================================

/// Deterministic color for a connection id: the digest's leading bytes pick
/// a hue, rendered at fixed saturation and lightness.
#[must_use]
pub fn color_for(client_id: Uuid) -> String {
    let digest = Sha256::digest(client_id.as_bytes());
    let hue = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 360;
    format!("hsl({hue},70%,50%)")
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Register a connection's display identity.
pub fn add_user(room_state: &mut RoomState, client_id: Uuid, info: UserInfo) {
    room_state.users.insert(client_id, info);
}

/// Remove a connection's display identity, returning it if present.
pub fn remove_user(room_state: &mut RoomState, client_id: Uuid) -> Option<UserInfo> {
    room_state.users.remove(&client_id)
}

/// Owned copy of the current presence map.
#[must_use]
pub fn users_snapshot(room_state: &RoomState) -> HashMap<Uuid, UserInfo> {
    room_state.users.clone()
}

/// Set the display name announced by `user:join`, keeping the color assigned
/// at connect. Returns the resulting presence snapshot for broadcast, or
/// `None` if the connection is not registered in the room.
pub async fn rename_user(
    state: &AppState,
    room_key: &str,
    client_id: Uuid,
    name: &str,
) -> Option<HashMap<Uuid, UserInfo>> {
    let mut rooms = state.rooms.write().await;
    let room_state = room::room_entry(&mut rooms, room_key);
    let info = room_state.users.get_mut(&client_id)?;
    info.name = name.to_owned();
    Some(users_snapshot(room_state))
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
