use super::*;
use crate::state::test_helpers::seed_room;
use futures::{SinkExt, StreamExt};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =============================================================================
// HELPERS
// =============================================================================

/// Register a peer directly in the room registry, the way `run_ws` does on
/// upgrade, and hand back its broadcast receiver.
async fn register_peer(
    state: &AppState,
    room_key: &str,
    name: &str,
) -> (Uuid, mpsc::Receiver<ServerMessage>) {
    let client_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(32);
    let info = UserInfo { name: name.into(), color: presence::color_for(client_id) };
    room::join_room(state, room_key, client_id, info, tx).await;
    (client_id, rx)
}

async fn recv_broadcast(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("broadcast receive timed out")
        .expect("broadcast channel closed unexpectedly")
}

async fn assert_no_broadcast(rx: &mut mpsc::Receiver<ServerMessage>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no broadcast message"
    );
}

fn history_ids(msg: &ServerMessage) -> Vec<&str> {
    let (ServerMessage::HistoryInit { operations } | ServerMessage::HistoryUpdate { operations }) = msg
    else {
        panic!("expected a history snapshot, got {}", msg.event());
    };
    operations.iter().map(|op| op.id.as_str()).collect()
}

fn stroke_end_text(id: &str) -> String {
    format!(
        r##"{{"type":"stroke:end","stroke":{{"id":"{id}","tool":"brush","color":"#000000","size":4,"points":[{{"x":1,"y":1}},{{"x":2,"y":2}}]}}}}"##
    )
}

async fn drive(state: &AppState, room_key: &str, client_id: Uuid, session: &mut Session, text: &str) {
    process_inbound_text(state, room_key, client_id, session, text).await;
}

// =============================================================================
// ROOM NORMALIZATION
// =============================================================================

#[test]
fn blank_room_keys_normalize_to_default() {
    // The normalization lives in handle_ws; mirror its expression here.
    let normalize = |raw: Option<&str>| {
        raw.map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROOM)
            .to_owned()
    };
    assert_eq!(normalize(None), "global");
    assert_eq!(normalize(Some("")), "global");
    assert_eq!(normalize(Some("   ")), "global");
    assert_eq!(normalize(Some("studio")), "studio");
}

// =============================================================================
// HISTORY SCENARIOS
// =============================================================================

#[tokio::test]
async fn stroke_end_broadcasts_full_history_to_the_room() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;

    assert_eq!(history_ids(&recv_broadcast(&mut rx_a).await), vec!["s1"]);
    assert_eq!(history_ids(&recv_broadcast(&mut rx_b).await), vec!["s1"]);
}

#[tokio::test]
async fn undo_then_redo_round_trips_the_snapshot() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;
    recv_broadcast(&mut rx_a).await;

    drive(&state, "attic", a, &mut session, r#"{"type":"undo"}"#).await;
    assert!(history_ids(&recv_broadcast(&mut rx_a).await).is_empty());

    drive(&state, "attic", a, &mut session, r#"{"type":"redo"}"#).await;
    assert_eq!(history_ids(&recv_broadcast(&mut rx_a).await), vec!["s1"]);
}

#[tokio::test]
async fn repeated_undo_drains_history_then_goes_quiet() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;
    drive(&state, "attic", a, &mut session, &stroke_end_text("s2")).await;
    recv_broadcast(&mut rx_a).await;
    recv_broadcast(&mut rx_a).await;

    drive(&state, "attic", a, &mut session, r#"{"type":"undo"}"#).await;
    assert_eq!(history_ids(&recv_broadcast(&mut rx_a).await), vec!["s1"]);

    drive(&state, "attic", a, &mut session, r#"{"type":"undo"}"#).await;
    assert!(history_ids(&recv_broadcast(&mut rx_a).await).is_empty());

    // A third undo finds an empty log: no-op, no broadcast.
    drive(&state, "attic", a, &mut session, r#"{"type":"undo"}"#).await;
    assert_no_broadcast(&mut rx_a).await;
}

#[tokio::test]
async fn new_stroke_invalidates_the_redo_branch() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;
    drive(&state, "attic", a, &mut session, r#"{"type":"undo"}"#).await;
    drive(&state, "attic", a, &mut session, &stroke_end_text("s2")).await;
    recv_broadcast(&mut rx_a).await;
    recv_broadcast(&mut rx_a).await;
    assert_eq!(history_ids(&recv_broadcast(&mut rx_a).await), vec!["s2"]);

    // s1 is unreachable now; redo has nothing to restore.
    drive(&state, "attic", a, &mut session, r#"{"type":"redo"}"#).await;
    assert_no_broadcast(&mut rx_a).await;
}

#[tokio::test]
async fn late_joiner_gets_history_once_and_not_on_cursor_traffic() {
    let state = AppState::new();
    let (a, _rx_a) = register_peer(&state, "attic", "a").await;
    let mut session = Session::new();
    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;

    // B joins after the commit: its join-time snapshot is exactly [s1].
    let b = Uuid::new_v4();
    let (tx_b, mut rx_b) = mpsc::channel(32);
    let info = UserInfo { name: "b".into(), color: presence::color_for(b) };
    let (operations, _users) = room::join_room(&state, "attic", b, info, tx_b).await;
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].id, "s1");

    // Subsequent cursor traffic relays cursor positions, never history.
    drive(&state, "attic", a, &mut session, r#"{"type":"cursor:move","x":5.0,"y":6.0}"#).await;
    let relayed = recv_broadcast(&mut rx_b).await;
    assert_eq!(relayed.event(), "cursor:move");
    assert_no_broadcast(&mut rx_b).await;
}

// =============================================================================
// PRESENCE
// =============================================================================

#[tokio::test]
async fn user_join_renames_and_rebroadcasts_presence() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", presence::ANONYMOUS).await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, r#"{"type":"user:join","name":"ada"}"#).await;

    for rx in [&mut rx_a, &mut rx_b] {
        let ServerMessage::UsersUpdate { users } = recv_broadcast(rx).await else {
            panic!("expected users:update");
        };
        assert_eq!(users.len(), 2);
        assert_eq!(users[&a].name, "ada");
        assert_eq!(users[&a].color, presence::color_for(a));
    }
}

// =============================================================================
// LIVE RELAY
// =============================================================================

#[tokio::test]
async fn live_stroke_relays_to_peers_but_not_the_sender() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    let start = r##"{"type":"stroke:start","stroke":{"id":"s1","tool":"brush","color":"#000000","size":4,"points":[{"x":1,"y":1}]}}"##;
    drive(&state, "attic", a, &mut session, start).await;
    let update = r#"{"type":"stroke:update","stroke_id":"s1","point":{"x":2,"y":2}}"#;
    drive(&state, "attic", a, &mut session, update).await;

    assert_eq!(recv_broadcast(&mut rx_b).await.event(), "stroke:start");
    assert_eq!(recv_broadcast(&mut rx_b).await.event(), "stroke:update");
    assert_no_broadcast(&mut rx_a).await;
}

#[tokio::test]
async fn updates_for_unknown_strokes_are_dropped() {
    let state = AppState::new();
    let (a, _rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    let update = r#"{"type":"stroke:update","stroke_id":"never-started","point":{"x":2,"y":2}}"#;
    drive(&state, "attic", a, &mut session, update).await;

    assert_no_broadcast(&mut rx_b).await;
}

#[tokio::test]
async fn stroke_end_commits_without_a_prior_start() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let mut session = Session::new();

    // No stroke:start for s1 — the commit must land regardless.
    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;
    assert_eq!(history_ids(&recv_broadcast(&mut rx_a).await), vec!["s1"]);
}

#[tokio::test]
async fn stroke_end_closes_the_live_stroke() {
    let state = AppState::new();
    let (a, _rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    let start = r##"{"type":"stroke:start","stroke":{"id":"s1","tool":"brush","color":"#000000","size":4,"points":[{"x":1,"y":1}]}}"##;
    drive(&state, "attic", a, &mut session, start).await;
    drive(&state, "attic", a, &mut session, &stroke_end_text("s1")).await;
    recv_broadcast(&mut rx_b).await; // stroke:start relay
    recv_broadcast(&mut rx_b).await; // history:update

    // The id was retired at commit; a stray update no longer relays.
    let update = r#"{"type":"stroke:update","stroke_id":"s1","point":{"x":9,"y":9}}"#;
    drive(&state, "attic", a, &mut session, update).await;
    assert_no_broadcast(&mut rx_b).await;
}

// =============================================================================
// MALFORMED INPUT
// =============================================================================

#[tokio::test]
async fn malformed_messages_are_dropped_silently() {
    let state = AppState::new();
    let (a, mut rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, "not json").await;
    drive(&state, "attic", a, &mut session, r#"{"type":"no:such:event"}"#).await;
    drive(&state, "attic", a, &mut session, r#"{"type":"stroke:end"}"#).await;

    assert_no_broadcast(&mut rx_a).await;
    assert_no_broadcast(&mut rx_b).await;
}

// =============================================================================
// DISCONNECT
// =============================================================================

#[tokio::test]
async fn disconnect_emits_leave_last_cursor_and_presence() {
    let state = AppState::new();
    let (a, _rx_a) = register_peer(&state, "attic", "a").await;
    let (b, mut rx_b) = register_peer(&state, "attic", "b").await;
    let mut session = Session::new();

    drive(&state, "attic", a, &mut session, r#"{"type":"cursor:move","x":50.0,"y":60.0}"#).await;
    assert_eq!(recv_broadcast(&mut rx_b).await.event(), "cursor:move");

    disconnect_cleanup(&state, "attic", a, session.last_cursor).await;

    assert_eq!(recv_broadcast(&mut rx_b).await, ServerMessage::CursorLeave { client_id: a });

    let ServerMessage::CursorLast { x, y, color } = recv_broadcast(&mut rx_b).await else {
        panic!("expected cursor:last");
    };
    assert!((x - 50.0).abs() < f64::EPSILON);
    assert!((y - 60.0).abs() < f64::EPSILON);
    assert_eq!(color, presence::color_for(a));

    let ServerMessage::UsersUpdate { users } = recv_broadcast(&mut rx_b).await else {
        panic!("expected users:update");
    };
    assert!(users.contains_key(&b));
    assert!(!users.contains_key(&a));
}

#[tokio::test]
async fn disconnect_without_cursor_movement_skips_the_fade_marker() {
    let state = AppState::new();
    let (a, _rx_a) = register_peer(&state, "attic", "a").await;
    let (_b, mut rx_b) = register_peer(&state, "attic", "b").await;

    disconnect_cleanup(&state, "attic", a, None).await;

    assert_eq!(recv_broadcast(&mut rx_b).await.event(), "cursor:leave");
    assert_eq!(recv_broadcast(&mut rx_b).await.event(), "users:update");
    assert_no_broadcast(&mut rx_b).await;
}

#[tokio::test]
async fn disconnect_of_unregistered_connection_is_silent() {
    let state = AppState::new();
    let (_a, mut rx_a) = register_peer(&state, "attic", "a").await;

    disconnect_cleanup(&state, "attic", Uuid::new_v4(), None).await;
    assert_no_broadcast(&mut rx_a).await;
}

// =============================================================================
// SOCKET SESSION (full transport path)
// =============================================================================

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn recv_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("socket receive timed out")
            .expect("socket closed unexpectedly")
            .expect("socket read failed");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("server sent invalid json");
        }
    }
}

#[tokio::test]
async fn socket_session_connect_draw_and_sync() {
    let state = AppState::new();
    seed_room(&state, "smoke", vec![]).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.expect("serve");
    });

    let url = format!("ws://{addr}/ws?room=smoke");
    let (mut ws_a, _) = connect_async(url.as_str()).await.expect("connect a");

    let connected = recv_json(&mut ws_a).await;
    assert_eq!(connected["type"], "session:connected");
    assert!(connected["client_id"].is_string());
    assert!(connected["color"].as_str().expect("color").starts_with("hsl("));

    let init = recv_json(&mut ws_a).await;
    assert_eq!(init["type"], "history:init");
    assert_eq!(init["operations"].as_array().expect("operations").len(), 0);

    let presence_a = recv_json(&mut ws_a).await;
    assert_eq!(presence_a["type"], "users:update");
    assert_eq!(presence_a["users"].as_object().expect("users").len(), 1);

    let (mut ws_b, _) = connect_async(url.as_str()).await.expect("connect b");
    assert_eq!(recv_json(&mut ws_b).await["type"], "session:connected");
    assert_eq!(recv_json(&mut ws_b).await["type"], "history:init");
    assert_eq!(
        recv_json(&mut ws_b).await["users"].as_object().expect("users").len(),
        2
    );
    assert_eq!(
        recv_json(&mut ws_a).await["users"].as_object().expect("users").len(),
        2
    );

    ws_a.send(WsMessage::Text(stroke_end_text("s1").into()))
        .await
        .expect("send stroke:end");

    let update_a = recv_json(&mut ws_a).await;
    assert_eq!(update_a["type"], "history:update");
    assert_eq!(update_a["operations"][0]["id"], "s1");
    let update_b = recv_json(&mut ws_b).await;
    assert_eq!(update_b["type"], "history:update");
    assert_eq!(update_b["operations"][0]["id"], "s1");
}
