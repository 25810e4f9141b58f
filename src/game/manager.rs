//! Room registry and connection-to-room resolution.

use crate::auth::Identity;
use crate::config::GameConfig;
use crate::db::Storage;
use crate::error::GameError;
use crate::game::room::{RoomActor, RoomHandle};
use crate::game::{RoomId, Settings};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};
use uplink_proto::{JoinRequest, RoomMode, ServerMessage};

/// Top-level registry of live rooms. One per process.
pub struct SessionManager {
    rooms: DashMap<RoomId, RoomHandle>,
    /// One lock per matchmaking pool key; holding it across the
    /// scan-then-create window keeps two identical concurrent requests out
    /// of two different half-filled rooms.
    pool_locks: DashMap<String, Arc<Mutex<()>>>,
    storage: Arc<dyn Storage>,
    cfg: GameConfig,
    retire_tx: mpsc::UnboundedSender<RoomId>,
}

impl SessionManager {
    /// Build the manager. The returned receiver yields ids of retired rooms;
    /// feed it to [`SessionManager::run_retirements`].
    pub fn new(
        storage: Arc<dyn Storage>,
        cfg: GameConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RoomId>) {
        let (retire_tx, retire_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(SessionManager {
            rooms: DashMap::new(),
            pool_locks: DashMap::new(),
            storage,
            cfg,
            retire_tx,
        });
        (manager, retire_rx)
    }

    /// Drain room retirements, dropping each retired room's handle.
    pub async fn run_retirements(self: Arc<Self>, mut retire_rx: mpsc::UnboundedReceiver<RoomId>) {
        while let Some(room_id) = retire_rx.recv().await {
            if self.rooms.remove(&room_id).is_some() {
                debug!(room_id = %room_id, "room removed from registry");
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Allocate a fresh room. Solo mode forces a single seat regardless of
    /// the requested settings.
    pub fn create_room(
        &self,
        owner: Option<&Identity>,
        mode: RoomMode,
        mut settings: Settings,
    ) -> Result<RoomId, GameError> {
        if mode == RoomMode::Solo {
            settings.max_players = 1;
        }
        if settings.max_players < 1 || settings.max_players > super::MAX_PLAYERS_LIMIT {
            return Err(GameError::InvalidSettings(format!(
                "max_players must be between 1 and {}",
                super::MAX_PLAYERS_LIMIT
            )));
        }

        let id: RoomId = uuid::Uuid::new_v4().to_string();
        let handle = RoomActor::spawn(
            id.clone(),
            mode,
            owner.map(|o| o.user_id.clone()),
            settings,
            Arc::clone(&self.storage),
            self.cfg.clone(),
            self.retire_tx.clone(),
        );
        info!(room_id = %id, %mode, "room created");
        self.rooms.insert(id.clone(), handle);
        Ok(id)
    }

    /// Admit `identity` into an explicitly named room.
    pub async fn join_room(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> Result<(RoomHandle, mpsc::Receiver<ServerMessage>), GameError> {
        let handle = self
            .rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or(GameError::RoomNotFound)?;
        let rx = handle.join(identity).await?;
        Ok((handle, rx))
    }

    /// Resolve a `join` request that carries no room id: solo rooms are
    /// always fresh; matchmaking requests land in a compatible pending room
    /// or materialize a new one.
    pub async fn join_request(
        &self,
        identity: Identity,
        req: &JoinRequest,
    ) -> Result<(RoomHandle, mpsc::Receiver<ServerMessage>), GameError> {
        let settings = Settings::for_mode(req.mode, req, self.cfg.matchmaking_players);

        if req.mode != RoomMode::Matchmaking {
            let room_id = self.create_room(Some(&identity), req.mode, settings)?;
            return self.join_room(&room_id, identity).await;
        }

        let key = settings.pool_key(req.mode);
        let lock = self
            .pool_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Under the pool lock: try every pending room for this key. A room
        // that filled up or started in the meantime just reads as
        // full/not-found and is skipped.
        let candidates: Vec<RoomHandle> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().mode == RoomMode::Matchmaking)
            .filter(|entry| entry.value().pool_key == key)
            .map(|entry| entry.value().clone())
            .collect();
        for handle in candidates {
            match handle.join(identity.clone()).await {
                Ok(rx) => return Ok((handle, rx)),
                Err(GameError::RoomFull | GameError::RoomNotFound) => continue,
                Err(e) => return Err(e),
            }
        }

        let room_id = self.create_room(Some(&identity), RoomMode::Matchmaking, settings)?;
        self.join_room(&room_id, identity).await
    }

    /// Terminate every room and wait until each actor has acknowledged.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!(rooms = handles.len(), "shutting down all rooms");
        for handle in handles {
            handle.shutdown().await;
        }
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbError, HistoryPage, LeaderboardEntry, MatchResult, RaceText};
    use async_trait::async_trait;

    struct FixedText;

    #[async_trait]
    impl Storage for FixedText {
        async fn fetch_text(
            &self,
            _language: &str,
            _category: &str,
            _id: Option<i64>,
        ) -> Result<RaceText, DbError> {
            Ok(RaceText {
                id: 1,
                content: "hello world".into(),
            })
        }

        async fn rating(&self, _user_id: &str) -> Result<i64, DbError> {
            Ok(crate::db::DEFAULT_RATING)
        }

        async fn save_match(
            &self,
            _text_id: i64,
            _results: &[MatchResult],
        ) -> Result<i64, DbError> {
            Ok(1)
        }

        async fn leaderboard(&self, _limit: u32) -> Result<Vec<LeaderboardEntry>, DbError> {
            Ok(Vec::new())
        }

        async fn history(
            &self,
            _user_id: &str,
            _cursor: Option<i64>,
            _limit: u32,
        ) -> Result<HistoryPage, DbError> {
            Ok(HistoryPage {
                entries: Vec::new(),
                next_cursor: None,
            })
        }

        async fn categories(&self, _language: &str) -> Result<Vec<String>, DbError> {
            Ok(Vec::new())
        }
    }

    fn manager() -> Arc<SessionManager> {
        let (manager, retire_rx) = SessionManager::new(Arc::new(FixedText), GameConfig::default());
        tokio::spawn(Arc::clone(&manager).run_retirements(retire_rx));
        manager
    }

    fn identity(id: &str) -> Identity {
        Identity {
            user_id: id.into(),
            username: id.to_uppercase(),
        }
    }

    fn mm_request() -> JoinRequest {
        JoinRequest {
            mode: RoomMode::Matchmaking,
            language: "en".into(),
            text_mode: "standard".into(),
            category: "general".into(),
        }
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let m = manager();
        let err = m.join_room("nope", identity("a")).await.unwrap_err();
        assert_eq!(err, GameError::RoomNotFound);
    }

    #[tokio::test]
    async fn explicit_room_create_and_join() {
        let m = manager();
        let settings = Settings::for_mode(RoomMode::Lobby, &mm_request(), 2);
        let room_id = m
            .create_room(Some(&identity("a")), RoomMode::Lobby, settings)
            .unwrap();
        let (_handle, _rx) = m.join_room(&room_id, identity("a")).await.unwrap();
        assert_eq!(m.room_count(), 1);
    }

    #[tokio::test]
    async fn solo_requests_never_share_a_room() {
        let m = manager();
        let mut req = mm_request();
        req.mode = RoomMode::Solo;

        let (room_a, _rx_a) = m.join_request(identity("a"), &req).await.unwrap();
        let (room_b, _rx_b) = m.join_request(identity("b"), &req).await.unwrap();
        assert_ne!(room_a.id, room_b.id);
    }

    #[tokio::test]
    async fn matchmaking_pairs_identical_requests() {
        let m = manager();
        let (room_a, _rx_a) = m.join_request(identity("a"), &mm_request()).await.unwrap();
        let (room_b, _rx_b) = m.join_request(identity("b"), &mm_request()).await.unwrap();
        // Default pool size is two: both land in the same room.
        assert_eq!(room_a.id, room_b.id);

        // A third request overflows into a new room.
        let (room_c, _rx_c) = m.join_request(identity("c"), &mm_request()).await.unwrap();
        assert_ne!(room_a.id, room_c.id);
    }

    #[tokio::test]
    async fn matchmaking_separates_different_settings() {
        let m = manager();
        let (room_a, _rx_a) = m.join_request(identity("a"), &mm_request()).await.unwrap();

        let mut other = mm_request();
        other.category = "quotes".into();
        let (room_b, _rx_b) = m.join_request(identity("b"), &other).await.unwrap();
        assert_ne!(room_a.id, room_b.id);
    }

    #[tokio::test]
    async fn concurrent_matchmaking_requests_never_split() {
        let m = manager();
        // Race many identical requests; with pool size 2 they must pair up
        // into exactly 4 rooms, never 5+ half-filled ones.
        let mut joins = tokio::task::JoinSet::new();
        for i in 0..8 {
            let m = Arc::clone(&m);
            joins.spawn(async move {
                let (handle, rx) = m
                    .join_request(identity(&format!("u{i}")), &mm_request())
                    .await
                    .unwrap();
                (handle.id, rx)
            });
        }
        let mut rxs = Vec::new();
        let mut ids = std::collections::HashSet::new();
        while let Some(res) = joins.join_next().await {
            let (id, rx) = res.unwrap();
            ids.insert(id);
            rxs.push(rx); // keep sessions alive until the end of the test
        }
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_room_leaves_the_registry() {
        let m = manager();
        let settings = Settings::for_mode(RoomMode::Lobby, &mm_request(), 2);
        let room_id = m
            .create_room(Some(&identity("a")), RoomMode::Lobby, settings)
            .unwrap();
        assert_eq!(m.room_count(), 1);

        // Nobody ever connects; the claim grace elapses and the retirement
        // drain empties the registry.
        tokio::time::sleep(GameConfig::default().finished_grace() * 2).await;
        for _ in 0..100 {
            if m.room_count() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(m.room_count(), 0);

        let err = m.join_room(&room_id, identity("a")).await.unwrap_err();
        assert_eq!(err, GameError::RoomNotFound);
    }

    #[tokio::test]
    async fn shutdown_drains_all_rooms() {
        let m = manager();
        let (_room, _rx) = m.join_request(identity("a"), &mm_request()).await.unwrap();
        m.shutdown().await;
        assert_eq!(m.room_count(), 0);

        let err = m.join_room("anything", identity("b")).await.unwrap_err();
        assert_eq!(err, GameError::RoomNotFound);
    }
}
