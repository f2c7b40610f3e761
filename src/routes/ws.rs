//! WebSocket handler — connection lifecycle and message dispatch.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id and enters a `select!` loop:
//! - Incoming client messages → decode at the boundary + dispatch
//! - Broadcast messages from room peers → forward to the socket
//!
//! Handler functions are pure business logic — they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! who receives what, and whether the sender is included.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → join room, send `session:connected` + `history:init` to the
//!    socket, broadcast `users:update` to the room
//! 2. Client sends messages → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (room broadcast / peer relay / silence)
//! 4. Close → part room → broadcast `cursor:leave`, `cursor:last`,
//!    `users:update` to the remaining members

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::services::{history, live, presence, room};
use crate::state::{AppState, Point, UserInfo};

/// Room assigned when the `room` query parameter is absent or blank.
const DEFAULT_ROOM: &str = "global";

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send messages directly.
enum Outcome {
    /// Broadcast to ALL room members including the sender. Used for the
    /// full-snapshot messages (`history:update`, `users:update`).
    Broadcast(ServerMessage),
    /// Already relayed to peers excluding the sender (ephemeral traffic).
    Relayed,
    /// No outbound traffic: no-op undo/redo, unknown relay targets,
    /// malformed payloads.
    Silent,
}

// =============================================================================
// SESSION
// =============================================================================

/// Ephemeral per-connection state, owned by the connection task and dropped
/// with it. Deliberately not part of `RoomState`: the server only relays
/// in-progress strokes, it never reconstructs them.
struct Session {
    /// Stroke ids this connection has started and not yet finished. Updates
    /// for ids never started here are dropped without a broadcast.
    live_strokes: HashSet<String>,
    /// Last pointer position seen, for the `cursor:last` fade marker.
    last_cursor: Option<Point>,
}

impl Session {
    fn new() -> Self {
        Self { live_strokes: HashSet::new(), last_cursor: None }
    }
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Boundary normalization: absent or blank room keys collapse to the
    // default room. Past this point the key is an opaque string.
    let room_key = params
        .get("room")
        .map(String::as_str)
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_ROOM)
        .to_owned();

    ws.on_upgrade(move |socket| run_ws(socket, state, room_key))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room_key: String) {
    let client_id = Uuid::new_v4();

    // Per-connection channel for receiving broadcast messages from peers.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(256);

    let color = presence::color_for(client_id);
    let info = UserInfo { name: presence::ANONYMOUS.into(), color: color.clone() };
    let (operations, users) = room::join_room(&state, &room_key, client_id, info, client_tx).await;

    info!(%client_id, room = %room_key, "ws: client connected");

    // To the joining connection only: its identity, then the full history.
    let welcome = ServerMessage::SessionConnected { client_id, color };
    let connected = send_message(&mut socket, &welcome).await.is_ok()
        && send_message(&mut socket, &ServerMessage::HistoryInit { operations }).await.is_ok();

    if connected {
        // Presence changed: snapshot to the whole room. The joiner's copy
        // arrives through its own channel and doubles as its presence init.
        room::broadcast(&state, &room_key, &ServerMessage::UsersUpdate { users }, None).await;

        let mut session = Session::new();

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(msg) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            process_inbound_text(&state, &room_key, client_id, &mut session, &text).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(msg) = client_rx.recv() => {
                    if send_message(&mut socket, &msg).await.is_err() {
                        break;
                    }
                }
            }
        }

        disconnect_cleanup(&state, &room_key, client_id, session.last_cursor).await;
    } else {
        disconnect_cleanup(&state, &room_key, client_id, None).await;
    }

    info!(%client_id, "ws: client disconnected");
}

/// Part the room and notify the remaining members. Ordering matters: the
/// presence entry is removed first, so the trailing `users:update` snapshot
/// no longer contains the departing connection.
async fn disconnect_cleanup(state: &AppState, room_key: &str, client_id: Uuid, last_cursor: Option<Point>) {
    let Some((info, users)) = room::part_room(state, room_key, client_id).await else {
        return;
    };

    room::broadcast(state, room_key, &ServerMessage::CursorLeave { client_id }, None).await;
    if let Some(point) = last_cursor {
        let last = ServerMessage::CursorLast { x: point.x, y: point.y, color: info.color };
        room::broadcast(state, room_key, &last, None).await;
    }
    room::broadcast(state, room_key, &ServerMessage::UsersUpdate { users }, None).await;
}

// =============================================================================
// MESSAGE DISPATCH
// =============================================================================

/// Decode one inbound text message, dispatch to its handler, apply the
/// outcome. Malformed input is logged and dropped — no reply, no disconnect.
async fn process_inbound_text(
    state: &AppState,
    room_key: &str,
    client_id: Uuid,
    session: &mut Session,
    text: &str,
) {
    let msg = match protocol::decode_client(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: malformed inbound message");
            return;
        }
    };

    if !msg.is_ephemeral() {
        info!(%client_id, event = msg.event(), "ws: recv message");
    }

    let outcome = handle_message(state, room_key, client_id, session, msg).await;
    match outcome {
        Outcome::Broadcast(msg) => room::broadcast(state, room_key, &msg, None).await,
        Outcome::Relayed | Outcome::Silent => {}
    }
}

async fn handle_message(
    state: &AppState,
    room_key: &str,
    client_id: Uuid,
    session: &mut Session,
    msg: ClientMessage,
) -> Outcome {
    match msg {
        ClientMessage::UserJoin { name } => {
            match presence::rename_user(state, room_key, client_id, &name).await {
                Some(users) => Outcome::Broadcast(ServerMessage::UsersUpdate { users }),
                None => Outcome::Silent,
            }
        }
        ClientMessage::StrokeStart { stroke } => {
            session.live_strokes.insert(stroke.id.clone());
            live::relay_stroke_start(state, room_key, client_id, stroke).await;
            Outcome::Relayed
        }
        ClientMessage::StrokeUpdate { stroke_id, point } => {
            // Updates for strokes this connection never started are dropped.
            if !session.live_strokes.contains(&stroke_id) {
                return Outcome::Silent;
            }
            live::relay_stroke_update(state, room_key, client_id, stroke_id, point).await;
            Outcome::Relayed
        }
        ClientMessage::StrokeEnd { stroke } => {
            // The commit point. A missing `stroke:start` does not block the
            // commit — the live set only gates preview updates.
            session.live_strokes.remove(&stroke.id);
            let operations = history::commit_stroke(state, room_key, stroke).await;
            Outcome::Broadcast(ServerMessage::HistoryUpdate { operations })
        }
        ClientMessage::Undo => match history::undo(state, room_key).await {
            Some(operations) => Outcome::Broadcast(ServerMessage::HistoryUpdate { operations }),
            None => Outcome::Silent,
        },
        ClientMessage::Redo => match history::redo(state, room_key).await {
            Some(operations) => Outcome::Broadcast(ServerMessage::HistoryUpdate { operations }),
            None => Outcome::Silent,
        },
        ClientMessage::CursorMove { x, y } => {
            session.last_cursor = Some(Point { x, y });
            live::broadcast_cursor(state, room_key, client_id, x, y).await;
            Outcome::Relayed
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    if !msg.is_ephemeral() {
        info!(event = msg.event(), "ws: send message");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
