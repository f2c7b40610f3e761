//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the room registry, history, presence, and relay
//! logic so the route handler can stay focused on protocol translation
//! and connection lifecycle.

pub mod history;
pub mod live;
pub mod presence;
pub mod room;
