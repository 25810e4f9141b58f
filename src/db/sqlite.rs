//! SQLite-backed [`Storage`] implementation.

use super::{
    DEFAULT_RATING, DbError, HistoryEntry, HistoryPage, LeaderboardEntry, MatchResult, RaceText,
    Storage,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage handle with connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (creating if missing) a database at `path` and run migrations.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // Use a uniquely named shared-cache memory database per call.
            // `file::memory:` is global-ish and will collide across parallel tests.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:uplinkd-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        sqlx::migrate!("./migrations").run(&pool).await?;

        // WAL mode lets the HTTP read paths run while a match is being saved.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Insert a race text, returning its id. Used by seeding and tests.
    pub async fn insert_text(
        &self,
        language: &str,
        category: &str,
        content: &str,
    ) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO texts (language, category, content) VALUES (?, ?, ?)")
            .bind(language)
            .bind(category)
            .bind(content)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn fetch_text(
        &self,
        language: &str,
        category: &str,
        id: Option<i64>,
    ) -> Result<RaceText, DbError> {
        let row = match id {
            Some(id) => {
                sqlx::query("SELECT id, content FROM texts WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, content FROM texts
                     WHERE language = ? AND category = ?
                     ORDER BY RANDOM() LIMIT 1",
                )
                .bind(language)
                .bind(category)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let row = row.ok_or_else(|| DbError::TextNotFound {
            language: language.to_string(),
            category: category.to_string(),
        })?;

        Ok(RaceText {
            id: row.try_get("id")?,
            content: row.try_get("content")?,
        })
    }

    async fn rating(&self, user_id: &str) -> Result<i64, DbError> {
        let rating: Option<i64> = sqlx::query_scalar("SELECT rating FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rating.unwrap_or(DEFAULT_RATING))
    }

    async fn save_match(&self, text_id: i64, results: &[MatchResult]) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;

        let played_at = chrono::Utc::now().to_rfc3339();
        let match_id = sqlx::query("INSERT INTO matches (text_id, played_at) VALUES (?, ?)")
            .bind(text_id)
            .bind(&played_at)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for result in results {
            // Upsert keeps the username fresh and applies the delta in one pass.
            sqlx::query(
                "INSERT INTO users (id, username, rating) VALUES (?, ?, ?)
                 ON CONFLICT (id) DO UPDATE SET
                     username = excluded.username,
                     rating = rating + ?",
            )
            .bind(&result.user_id)
            .bind(&result.username)
            .bind(DEFAULT_RATING + result.rating_delta)
            .bind(result.rating_delta)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO match_results (match_id, user_id, wpm, accuracy, rank, rating_delta)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(match_id)
            .bind(&result.user_id)
            .bind(result.wpm)
            .bind(result.accuracy)
            .bind(result.rank)
            .bind(result.rating_delta)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(match_id)
    }

    async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, DbError> {
        let rows = sqlx::query(
            "SELECT id, username, rating FROM users
             ORDER BY rating DESC, username ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LeaderboardEntry {
                    user_id: row.try_get("id")?,
                    username: row.try_get("username")?,
                    rating: row.try_get("rating")?,
                })
            })
            .collect()
    }

    async fn history(
        &self,
        user_id: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<HistoryPage, DbError> {
        // Fetch one extra row to learn whether another page exists.
        let rows = sqlx::query(
            "SELECT m.id AS match_id, r.wpm, r.accuracy, r.rank, r.rating_delta, m.played_at
             FROM match_results r
             JOIN matches m ON m.id = r.match_id
             WHERE r.user_id = ? AND m.id < ?
             ORDER BY m.id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(cursor.unwrap_or(i64::MAX))
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<HistoryEntry> = rows
            .iter()
            .map(|row| {
                Ok(HistoryEntry {
                    match_id: row.try_get("match_id")?,
                    wpm: row.try_get("wpm")?,
                    accuracy: row.try_get("accuracy")?,
                    rank: row.try_get("rank")?,
                    rating_delta: row.try_get("rating_delta")?,
                    played_at: row.try_get("played_at")?,
                })
            })
            .collect::<Result<_, DbError>>()?;

        let next_cursor = if entries.len() > limit as usize {
            entries.truncate(limit as usize);
            entries.last().map(|e| e.match_id)
        } else {
            None
        };

        Ok(HistoryPage {
            entries,
            next_cursor,
        })
    }

    async fn categories(&self, language: &str) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar(
            "SELECT DISTINCT category FROM texts WHERE language = ? ORDER BY category",
        )
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
