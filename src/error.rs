//! Unified error handling for uplinkd.
//!
//! The game-layer taxonomy maps admission failures onto application
//! WebSocket close codes; everything else reverts a transition
//! (`TextUnavailable`) or is reported back to the caller without ending
//! the connection.

use thiserror::Error;
use uplink_proto::{
    CLOSE_LOBBY_FULL, CLOSE_ROOM_NOT_FOUND, REASON_LOBBY_FULL, REASON_ROOM_NOT_FOUND,
};

/// Errors raised by the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    /// No room with the given id, or the room is past Lobby and no longer
    /// joinable.
    #[error("room not found")]
    RoomNotFound,

    /// Admission would exceed the room's participant limit.
    #[error("room is full")]
    RoomFull,

    /// Settings rejected at the caller-facing boundary.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The text provider failed at game start; the room reverts to Lobby.
    #[error("race text unavailable")]
    TextUnavailable,
}

impl GameError {
    /// Application close code and reason for errors that end the connection.
    ///
    /// Returns `None` for errors that must not drop the connection.
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        match self {
            Self::RoomFull => Some((CLOSE_LOBBY_FULL, REASON_LOBBY_FULL)),
            Self::RoomNotFound => Some((CLOSE_ROOM_NOT_FOUND, REASON_ROOM_NOT_FOUND)),
            Self::InvalidSettings(_) | Self::TextUnavailable => None,
        }
    }
}
