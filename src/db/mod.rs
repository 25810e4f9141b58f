//! Persistent storage for race texts, match history, and ratings.
//!
//! Async SQLite access via SQLx. The game layer talks to storage only
//! through the [`Storage`] trait so tests can run against an in-memory
//! database (or a stub) without touching the filesystem.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Rating assigned to players with no recorded matches.
pub const DEFAULT_RATING: i64 = 1000;

/// Storage errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("no text matches language={language} category={category}")]
    TextNotFound { language: String, category: String },
}

/// A race prompt fetched for a round.
#[derive(Debug, Clone)]
pub struct RaceText {
    pub id: i64,
    pub content: String,
}

impl RaceText {
    /// Number of typeable characters in the prompt.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// One participant's final line in a persisted match.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub user_id: String,
    pub username: String,
    pub wpm: u32,
    pub accuracy: f64,
    pub rank: u32,
    pub rating_delta: i64,
}

/// Leaderboard row, ordered by rating.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub username: String,
    pub rating: i64,
}

/// One match from a player's history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub match_id: i64,
    pub wpm: u32,
    pub accuracy: f64,
    pub rank: u32,
    pub rating_delta: i64,
    pub played_at: String,
}

/// A page of history plus the cursor for the next page, if any.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub next_cursor: Option<i64>,
}

/// Persistence seam between the game layer and SQLite.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Pick a race text. `id` pins a specific prompt (practice replays);
    /// otherwise one is chosen at random from the language/category pool.
    async fn fetch_text(
        &self,
        language: &str,
        category: &str,
        id: Option<i64>,
    ) -> Result<RaceText, DbError>;

    /// Current rating for a user, or [`DEFAULT_RATING`] if unknown.
    async fn rating(&self, user_id: &str) -> Result<i64, DbError>;

    /// Persist a finished match and apply rating deltas atomically.
    async fn save_match(&self, text_id: i64, results: &[MatchResult]) -> Result<i64, DbError>;

    /// Top players by rating.
    async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, DbError>;

    /// A user's match history, newest first, keyset-paginated by match id.
    async fn history(
        &self,
        user_id: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<HistoryPage, DbError>;

    /// Distinct text categories available for a language.
    async fn categories(&self, language: &str) -> Result<Vec<String>, DbError>;
}
