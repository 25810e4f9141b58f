//! Race engine: rooms, participants, matchmaking, ratings.
//!
//! Each room runs as an isolated actor task (see [`room`]); the
//! [`manager::SessionManager`] maps incoming connections onto rooms and owns
//! the registry.

pub mod manager;
pub mod rating;
pub mod room;
pub mod session;

use crate::error::GameError;
use uplink_proto::{JoinRequest, RoomMode, SettingsPayload};

/// Rooms cap out here regardless of what the owner asks for; the broadcast
/// fan-out and the pairwise rating pass are both quadratic in room size.
pub const MAX_PLAYERS_LIMIT: u32 = 8;

/// Unique room identifier (UUID v4, generated at creation).
pub type RoomId = String;

/// A room's race configuration. Owned by the room; edited only by the owner
/// and only while the room is still in the lobby phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub max_players: u32,
    pub language: String,
    pub text_mode: String,
    pub category: String,
}

impl Settings {
    /// Settings for a fresh room in the given mode. Solo rooms are pinned to
    /// a single seat; matchmaking rooms start at the configured pool size.
    pub fn for_mode(mode: RoomMode, req: &JoinRequest, matchmaking_players: u32) -> Self {
        let max_players = match mode {
            RoomMode::Solo => 1,
            RoomMode::Matchmaking => matchmaking_players,
            RoomMode::Lobby => 2,
        };
        Settings {
            max_players,
            language: req.language.clone(),
            text_mode: req.text_mode.clone(),
            category: req.category.clone(),
        }
    }

    /// Apply an owner edit, keeping the text mode. Rejects seat counts
    /// outside `1..=MAX_PLAYERS_LIMIT` or below current occupancy.
    pub fn apply(&mut self, payload: &SettingsPayload, occupancy: usize) -> Result<(), GameError> {
        if payload.max_players < 1 || payload.max_players > MAX_PLAYERS_LIMIT {
            return Err(GameError::InvalidSettings(format!(
                "max_players must be between 1 and {MAX_PLAYERS_LIMIT}"
            )));
        }
        if (payload.max_players as usize) < occupancy {
            return Err(GameError::InvalidSettings(format!(
                "max_players {} is below current occupancy {occupancy}",
                payload.max_players
            )));
        }
        if payload.language.is_empty() || payload.category.is_empty() {
            return Err(GameError::InvalidSettings(
                "language and category must be non-empty".into(),
            ));
        }
        self.max_players = payload.max_players;
        self.language = payload.language.clone();
        self.category = payload.category.clone();
        Ok(())
    }

    /// Wire representation for the `update_settings` echo.
    pub fn to_payload(&self) -> SettingsPayload {
        SettingsPayload {
            max_players: self.max_players,
            language: self.language.clone(),
            category: self.category.clone(),
        }
    }

    /// Pool key for matchmaking: requests under the same key may share a room.
    pub fn pool_key(&self, mode: RoomMode) -> String {
        format!(
            "{mode}|{}|{}|{}",
            self.language, self.text_mode, self.category
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(mode: RoomMode) -> JoinRequest {
        JoinRequest {
            mode,
            language: "en".into(),
            text_mode: "standard".into(),
            category: "general".into(),
        }
    }

    #[test]
    fn solo_rooms_have_one_seat() {
        let s = Settings::for_mode(RoomMode::Solo, &req(RoomMode::Solo), 4);
        assert_eq!(s.max_players, 1);
    }

    #[test]
    fn matchmaking_uses_configured_pool_size() {
        let s = Settings::for_mode(RoomMode::Matchmaking, &req(RoomMode::Matchmaking), 4);
        assert_eq!(s.max_players, 4);
    }

    #[test]
    fn apply_rejects_out_of_bounds_seats() {
        let mut s = Settings::for_mode(RoomMode::Lobby, &req(RoomMode::Lobby), 2);
        let bad = SettingsPayload {
            max_players: 0,
            language: "en".into(),
            category: "general".into(),
        };
        assert!(matches!(
            s.apply(&bad, 1),
            Err(GameError::InvalidSettings(_))
        ));

        let too_big = SettingsPayload {
            max_players: MAX_PLAYERS_LIMIT + 1,
            ..bad
        };
        assert!(s.apply(&too_big, 1).is_err());
    }

    #[test]
    fn apply_rejects_shrinking_below_occupancy() {
        let mut s = Settings::for_mode(RoomMode::Lobby, &req(RoomMode::Lobby), 2);
        s.max_players = 4;
        let payload = SettingsPayload {
            max_players: 2,
            language: "en".into(),
            category: "general".into(),
        };
        assert!(s.apply(&payload, 3).is_err());
        assert!(s.apply(&payload, 2).is_ok());
        assert_eq!(s.max_players, 2);
    }

    #[test]
    fn pool_key_distinguishes_settings() {
        let a = Settings::for_mode(RoomMode::Matchmaking, &req(RoomMode::Matchmaking), 2);
        let mut b = a.clone();
        b.category = "quotes".into();
        assert_ne!(
            a.pool_key(RoomMode::Matchmaking),
            b.pool_key(RoomMode::Matchmaking)
        );
    }
}
