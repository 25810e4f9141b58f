//! uplink-proto - Wire protocol for the Uplink typing-race server.
//!
//! Every frame on the wire is a JSON envelope `{"type": ..., "payload": ...}`
//! exchanged over a persistent WebSocket connection. This crate defines the
//! client-to-server and server-to-client message sets, the application close
//! codes, and the decode helpers used by both the server and test clients.

mod close;
mod message;

pub use close::{CLOSE_LOBBY_FULL, CLOSE_ROOM_NOT_FOUND, REASON_LOBBY_FULL, REASON_ROOM_NOT_FOUND};
pub use message::{
    ChatPayload, ClientMessage, InputPayload, JoinRequest, PlayerProgress, RaceResult,
    RoomMode, RosterEntry, ServerMessage, SettingsPayload,
};

use thiserror::Error;

/// Protocol decode errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ClientMessage {
    /// Decode a client envelope from raw JSON text.
    pub fn from_json(raw: &str) -> Result<Self, ProtoError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl ServerMessage {
    /// Encode a server envelope to JSON text.
    ///
    /// Serialization of these types cannot fail; a failure here would mean
    /// the message definitions themselves are broken, so it panics in
    /// debug-friendly fashion rather than forcing callers to thread errors.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server message serialization")
    }
}
