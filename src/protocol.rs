//! Message catalog for the realtime canvas protocol.
//!
//! DESIGN
//! ======
//! Every wire message is one variant of a tagged union, discriminated by the
//! `"type"` field holding a colon-separated event name (`"stroke:end"`,
//! `"users:update"`, ...). Decoding validates shape at the transport
//! boundary so the services can assume well-formed payloads.
//!
//! The two state-carrying server messages — `history:update` and
//! `users:update` — always carry the full current snapshot, never a delta.
//! That is the convergence mechanism: clients replace local state wholesale,
//! so any missed or reordered prior message is healed by the next broadcast.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{Point, StrokeOp, UserInfo};

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned when an inbound text message fails validation.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed client message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// =============================================================================
// CLIENT MESSAGES
// =============================================================================

/// Messages a client may send. Unknown tags and missing fields are rejected
/// at decode time and never reach the services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Announce a display name for this connection.
    #[serde(rename = "user:join")]
    UserJoin { name: String },
    /// A stroke has begun; relayed to peers for live preview.
    #[serde(rename = "stroke:start")]
    StrokeStart { stroke: StrokeOp },
    /// One incremental point for an in-progress stroke.
    #[serde(rename = "stroke:update")]
    StrokeUpdate { stroke_id: String, point: Point },
    /// The finished stroke; the only commit point for the history.
    #[serde(rename = "stroke:end")]
    StrokeEnd { stroke: StrokeOp },
    #[serde(rename = "undo")]
    Undo,
    #[serde(rename = "redo")]
    Redo,
    /// Pointer position; rate limiting is the sender's responsibility.
    #[serde(rename = "cursor:move")]
    CursorMove { x: f64, y: f64 },
}

// =============================================================================
// SERVER MESSAGES
// =============================================================================

/// Messages the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First message on every connection: the server-assigned connection id
    /// and the color derived from it.
    #[serde(rename = "session:connected")]
    SessionConnected { client_id: Uuid, color: String },
    /// Full history snapshot, sent once to a joining connection.
    #[serde(rename = "history:init")]
    HistoryInit { operations: Vec<StrokeOp> },
    /// Full history snapshot, broadcast to the room after every mutation.
    /// Clients must replace their local history, not patch it.
    #[serde(rename = "history:update")]
    HistoryUpdate { operations: Vec<StrokeOp> },
    /// Full presence snapshot, broadcast whenever presence changes.
    #[serde(rename = "users:update")]
    UsersUpdate { users: HashMap<Uuid, UserInfo> },
    /// Live relay of a peer's stroke start, tagged with the sender.
    #[serde(rename = "stroke:start")]
    StrokeStart { client_id: Uuid, stroke: StrokeOp },
    /// Live relay of one in-progress stroke point, tagged with the sender.
    #[serde(rename = "stroke:update")]
    StrokeUpdate { client_id: Uuid, stroke_id: String, point: Point },
    /// Live relay of a peer's pointer position.
    #[serde(rename = "cursor:move")]
    CursorMove { client_id: Uuid, x: f64, y: f64 },
    /// A peer disconnected; remove its cursor.
    #[serde(rename = "cursor:leave")]
    CursorLeave { client_id: Uuid },
    /// Fading marker at a departing peer's last pointer position.
    #[serde(rename = "cursor:last")]
    CursorLast { x: f64, y: f64, color: String },
}

impl ServerMessage {
    /// Wire tag of this message, for logging.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::SessionConnected { .. } => "session:connected",
            Self::HistoryInit { .. } => "history:init",
            Self::HistoryUpdate { .. } => "history:update",
            Self::UsersUpdate { .. } => "users:update",
            Self::StrokeStart { .. } => "stroke:start",
            Self::StrokeUpdate { .. } => "stroke:update",
            Self::CursorMove { .. } => "cursor:move",
            Self::CursorLeave { .. } => "cursor:leave",
            Self::CursorLast { .. } => "cursor:last",
        }
    }

    /// Ephemeral relay traffic, skipped by per-send logging.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::StrokeStart { .. } | Self::StrokeUpdate { .. } | Self::CursorMove { .. }
        )
    }
}

impl ClientMessage {
    /// Wire tag of this message, for logging.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::UserJoin { .. } => "user:join",
            Self::StrokeStart { .. } => "stroke:start",
            Self::StrokeUpdate { .. } => "stroke:update",
            Self::StrokeEnd { .. } => "stroke:end",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::CursorMove { .. } => "cursor:move",
        }
    }

    /// Ephemeral relay traffic, skipped by per-receive logging.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::StrokeStart { .. } | Self::StrokeUpdate { .. } | Self::CursorMove { .. }
        )
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Decode one inbound text message.
///
/// # Errors
///
/// Returns `ProtocolError::Malformed` for invalid JSON, an unknown `type`
/// tag, or a payload missing required fields.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
