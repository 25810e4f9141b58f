//! Application WebSocket close codes.
//!
//! Codes in the 4000-4999 range are reserved for application use; the
//! frontend matches on both the numeric code and the reason string.

/// Admission refused because the room is at its participant limit.
pub const CLOSE_LOBBY_FULL: u16 = 4008;

/// Reason string paired with [`CLOSE_LOBBY_FULL`].
pub const REASON_LOBBY_FULL: &str = "LOBBY_FULL";

/// The requested room id does not exist (or is no longer joinable).
pub const CLOSE_ROOM_NOT_FOUND: u16 = 4004;

/// Reason string paired with [`CLOSE_ROOM_NOT_FOUND`].
pub const REASON_ROOM_NOT_FOUND: &str = "ROOM_NOT_FOUND";
