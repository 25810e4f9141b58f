//! Message envelope definitions.
//!
//! Field names mirror what the browser frontend sends and expects; the one
//! camelCase holdout (`textMode` in the join request) is pinned with an
//! explicit rename so the serde casing convention stays snake_case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a room was brought into existence, and how it admits participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomMode {
    /// Explicitly created room; the owner invites others by sharing the id.
    Lobby,
    /// Single-participant practice room; starts as soon as its player is ready.
    Solo,
    /// Pool room; the manager fills it with compatible join requests.
    Matchmaking,
}

impl std::fmt::Display for RoomMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomMode::Lobby => write!(f, "lobby"),
            RoomMode::Solo => write!(f, "solo"),
            RoomMode::Matchmaking => write!(f, "matchmaking"),
        }
    }
}

/// Payload of a `join` request (connection without an explicit room id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub mode: RoomMode,
    pub language: String,
    #[serde(rename = "textMode")]
    pub text_mode: String,
    pub category: String,
}

/// Room settings as they travel on the wire, both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub max_players: u32,
    pub language: String,
    pub category: String,
}

/// Chat text from a client; the server stamps the sender on relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// A progress report: the client claims to have correctly typed
/// `current_index` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPayload {
    pub current_index: usize,
    pub wpm: u32,
    pub accuracy: u32,
}

/// Messages a client may send after the connection is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Join(JoinRequest),
    UpdateSettings(SettingsPayload),
    ChatMessage(ChatPayload),
    PlayerReady,
    GameStart,
    ClientInput(InputPayload),
}

/// One entry in a lobby roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub user_id: String,
    pub username: String,
    pub is_owner: bool,
}

/// Live progress of one participant, sent on the broadcast tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub user_id: String,
    pub username: String,
    pub progress: usize,
    pub wpm: u32,
}

/// Final per-participant result; list order is finish rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceResult {
    pub user_id: String,
    pub username: String,
    pub wpm: u32,
    pub accuracy: u32,
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Roster snapshot after an admission.
    PlayerJoined(Vec<RosterEntry>),
    /// Roster snapshot after a departure or ownership change.
    LobbyUpdate(Vec<RosterEntry>),
    /// Authoritative settings echo after an owner edit (or on admission).
    UpdateSettings(SettingsPayload),
    /// Countdown armed: the race text is revealed and every client counts
    /// down to the shared `start_time` locally.
    GameStart {
        text: String,
        start_time: DateTime<Utc>,
    },
    /// Periodic opponent progress while the race is running.
    StateUpdate(Vec<PlayerProgress>),
    /// Relayed chat line.
    ChatMessage { sender_name: String, text: String },
    /// Terminal results broadcast, ranked best-first.
    GameEnd { results: Vec<RaceResult> },
    /// Non-fatal error surfaced to the whole room (text fetch failure,
    /// persistence warning).
    Error { message: String },
}
