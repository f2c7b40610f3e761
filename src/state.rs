//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It owns the room registry: a map from opaque room key to live room state.
//! Rooms are created on first lookup and retained for the lifetime of the
//! process — a room whose last client leaves keeps its history. This service
//! is explicitly non-durable; nothing here survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::services::history::OperationLog;

// =============================================================================
// MODEL
// =============================================================================

/// A single canvas-space coordinate. No range invariant — clients may draw
/// outside the visible canvas and the server does not clamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Drawing tool for a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    /// Erases previously drawn pixels; `color` is ignored for this tool.
    Eraser,
}

/// One committed drawing gesture. Immutable once appended to the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeOp {
    /// Opaque unique identifier chosen by the drawing client.
    pub id: String,
    pub tool: Tool,
    #[serde(default)]
    pub color: String,
    pub size: f64,
    pub points: Vec<Point>,
    /// Milliseconds since the Unix epoch. Stamped by the server at commit
    /// time when the client leaves it at 0.
    #[serde(default)]
    pub ts: i64,
}

/// Display identity of a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    /// Derived from the connection id at join time; stable for the
    /// connection's lifetime.
    pub color: String,
}

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. All fields are mutated only under the registry's
/// write lock, so each handler invocation runs to completion before another
/// touches the room.
pub struct RoomState {
    /// Authoritative stroke history with its undo/redo buffer.
    pub history: OperationLog,
    /// Connected clients: `client_id` -> sender for outgoing messages.
    pub clients: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
    /// Presence: `client_id` -> display identity. Keys always equal the
    /// currently connected client ids for this room.
    pub users: HashMap<Uuid, UserInfo>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self { history: OperationLog::new(), clients: HashMap::new(), users: HashMap::new() }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum — the registry is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
