//! Room actor: one race's full lifecycle in an isolated task.
//!
//! All game-affecting mutations (join, leave, input, start, settings) arrive
//! as [`RoomEvent`]s on one queue drained by exactly one task, so concurrent
//! inputs from different connections are applied in a single linearizable
//! order. Timers (countdown, broadcast tick, retirement grace) live in the
//! same `select!` loop and are dropped with the actor.

use crate::auth::Identity;
use crate::config::GameConfig;
use crate::db::{MatchResult, RaceText, Storage};
use crate::error::GameError;
use crate::game::rating::{self, Standing};
use crate::game::session::{OUTBOUND_QUEUE_CAPACITY, Participant, words_per_minute};
use crate::game::{RoomId, Settings};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uplink_proto::{
    ChatPayload, InputPayload, PlayerProgress, RaceResult, RoomMode, RosterEntry, ServerMessage,
    SettingsPayload,
};

/// Capacity of the per-room event queue shared by all producers.
const EVENT_QUEUE_CAPACITY: usize = 128;

/// Events that can be sent to a room actor.
#[derive(Debug)]
pub enum RoomEvent {
    /// Admit a participant. On success the reply carries the receiving end
    /// of the participant's outbound queue.
    Join {
        identity: Identity,
        reply_tx: oneshot::Sender<Result<mpsc::Receiver<ServerMessage>, GameError>>,
    },
    /// Connection closed or the participant left deliberately.
    Leave { user_id: String },
    /// Participant declares readiness (Lobby only).
    Ready { user_id: String },
    /// Owner requests the Lobby -> Countdown transition.
    Start { user_id: String },
    /// Owner edits the room settings (Lobby only).
    UpdateSettings {
        user_id: String,
        payload: SettingsPayload,
    },
    /// Chat line, relayed to every member.
    Chat { user_id: String, payload: ChatPayload },
    /// Progress report from a racing participant.
    Input {
        user_id: String,
        payload: InputPayload,
    },
    /// Terminate timers and close all sessions; replies once processed.
    Shutdown { reply_tx: oneshot::Sender<()> },
}

/// Lifecycle phase. Only ever advances.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Lobby,
    Countdown { deadline: Instant },
    Game { started: Instant },
    Finished { retire_at: Instant },
}

/// Cheap clonable handle to a room actor.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: RoomId,
    pub mode: RoomMode,
    /// Matchmaking pool key; stable because matchmaking rooms reject
    /// settings edits.
    pub pool_key: String,
    tx: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    /// Request admission. A retired room reads as not found.
    pub async fn join(
        &self,
        identity: Identity,
    ) -> Result<mpsc::Receiver<ServerMessage>, GameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomEvent::Join { identity, reply_tx })
            .await
            .map_err(|_| GameError::RoomNotFound)?;
        reply_rx.await.map_err(|_| GameError::RoomNotFound)?
    }

    /// Send an event, waiting for queue capacity. A send to a retired room
    /// is a no-op.
    pub async fn event(&self, event: RoomEvent) {
        let _ = self.tx.send(event).await;
    }

    /// Ask the actor to stop and wait until it has processed the request.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(RoomEvent::Shutdown { reply_tx }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

/// State owner for a single race room.
pub struct RoomActor {
    id: RoomId,
    mode: RoomMode,
    owner_id: Option<String>,
    settings: Settings,
    phase: Phase,
    /// Join order preserved; ownership migrates to the longest-joined member.
    participants: Vec<Participant>,
    text: Option<RaceText>,
    storage: Arc<dyn Storage>,
    cfg: GameConfig,
    retire_tx: mpsc::UnboundedSender<RoomId>,
    ever_joined: bool,
    /// A created-but-never-joined room retires at this deadline, so rooms
    /// allocated over the HTTP contract cannot accumulate unclaimed.
    claim_deadline: Instant,
}

impl RoomActor {
    /// Create a room actor and spawn its driver task.
    pub fn spawn(
        id: RoomId,
        mode: RoomMode,
        owner_id: Option<String>,
        settings: Settings,
        storage: Arc<dyn Storage>,
        cfg: GameConfig,
        retire_tx: mpsc::UnboundedSender<RoomId>,
    ) -> RoomHandle {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let handle = RoomHandle {
            id: id.clone(),
            mode,
            pool_key: settings.pool_key(mode),
            tx,
        };

        let claim_grace = cfg.finished_grace();
        let actor = RoomActor {
            id,
            mode,
            owner_id,
            settings,
            phase: Phase::Lobby,
            participants: Vec::new(),
            text: None,
            storage,
            cfg,
            retire_tx,
            ever_joined: false,
            claim_deadline: Instant::now() + claim_grace,
        };
        tokio::spawn(actor.run(rx));

        handle
    }

    /// The main actor loop: one event or timer fire at a time.
    async fn run(mut self, mut rx: mpsc::Receiver<RoomEvent>) {
        let mut tick = time::interval(self.cfg.broadcast_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = match self.phase {
                Phase::Countdown { deadline } => Some(deadline),
                Phase::Finished { retire_at } => Some(retire_at),
                Phase::Lobby if !self.ever_joined => Some(self.claim_deadline),
                _ => None,
            };

            tokio::select! {
                event = rx.recv() => match event {
                    Some(RoomEvent::Shutdown { reply_tx }) => {
                        let _ = reply_tx.send(());
                        break;
                    }
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                // The async block defers the unwrap until the branch is
                // enabled; select! would otherwise evaluate it eagerly.
                _ = async { time::sleep_until(deadline.unwrap()).await }, if deadline.is_some() => {
                    match self.phase {
                        Phase::Countdown { .. } => self.begin_race(),
                        Phase::Finished { .. } => break,
                        // Nobody ever claimed the room; give the slot back.
                        Phase::Lobby if !self.ever_joined => break,
                        _ => {}
                    }
                }
                _ = tick.tick(), if matches!(self.phase, Phase::Game { .. }) => {
                    self.broadcast_progress();
                }
            }

            if self.should_retire() {
                break;
            }
        }

        debug!(room_id = %self.id, "room retired");
        let _ = self.retire_tx.send(self.id);
    }

    /// Empty rooms are retired as soon as they have been used once; a
    /// mid-race room never empties because abandoned members are kept for
    /// ranking.
    fn should_retire(&self) -> bool {
        self.ever_joined && self.participants.is_empty() && !matches!(self.phase, Phase::Game { .. })
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join { identity, reply_tx } => {
                let _ = reply_tx.send(self.handle_join(identity));
            }
            RoomEvent::Leave { user_id } => self.handle_leave(&user_id).await,
            RoomEvent::Ready { user_id } => self.handle_ready(&user_id).await,
            RoomEvent::Start { user_id } => self.handle_start(&user_id).await,
            RoomEvent::UpdateSettings { user_id, payload } => {
                self.handle_update_settings(&user_id, payload);
            }
            RoomEvent::Chat { user_id, payload } => self.handle_chat(&user_id, payload),
            RoomEvent::Input { user_id, payload } => self.handle_input(&user_id, payload).await,
            RoomEvent::Shutdown { .. } => unreachable!("handled in run loop"),
        }
    }

    fn handle_join(
        &mut self,
        identity: Identity,
    ) -> Result<mpsc::Receiver<ServerMessage>, GameError> {
        if !matches!(self.phase, Phase::Lobby) {
            return Err(GameError::RoomNotFound);
        }

        // A rejoin under the same identity replaces the stale session.
        self.participants
            .retain(|p| p.identity.user_id != identity.user_id);

        if self.participants.len() >= self.settings.max_players as usize {
            return Err(GameError::RoomFull);
        }

        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        if self.owner_id.is_none() {
            self.owner_id = Some(identity.user_id.clone());
        }
        info!(room_id = %self.id, user_id = %identity.user_id, "participant joined");
        self.participants.push(Participant::new(identity, tx));
        self.ever_joined = true;

        self.broadcast(&ServerMessage::PlayerJoined(self.roster()));
        if let Some(joined) = self.participants.last() {
            joined.send(&ServerMessage::UpdateSettings(self.settings.to_payload()));
        }
        Ok(rx)
    }

    async fn handle_leave(&mut self, user_id: &str) {
        let Some(idx) = self
            .participants
            .iter()
            .position(|p| p.identity.user_id == user_id)
        else {
            return;
        };

        match self.phase {
            Phase::Game { .. } => {
                // Keep the seat so the final ranking still covers them.
                self.participants[idx].abandoned = true;
                info!(room_id = %self.id, user_id,
                      idle_secs = self.participants[idx].last_activity.elapsed().as_secs(),
                      "participant abandoned mid-race");
                self.maybe_finish().await;
            }
            _ => {
                let left = self.participants.remove(idx);
                info!(room_id = %self.id, user_id, "participant left");
                if self.owner_id.as_deref() == Some(user_id) {
                    self.owner_id = self
                        .participants
                        .first()
                        .map(|p| p.identity.user_id.clone());
                }
                if !self.participants.is_empty() {
                    self.broadcast(&ServerMessage::LobbyUpdate(self.roster()));
                }
                drop(left);
            }
        }
    }

    async fn handle_ready(&mut self, user_id: &str) {
        if !matches!(self.phase, Phase::Lobby) {
            return;
        }
        let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.identity.user_id == user_id)
        else {
            return;
        };
        p.ready = true;

        match self.mode {
            // Solo rooms self-start the moment their sole player is ready.
            RoomMode::Solo => self.start_race().await,
            // Matchmaking rooms start when full and unanimous.
            RoomMode::Matchmaking => {
                let full = self.participants.len() >= self.settings.max_players as usize;
                if full && self.participants.iter().all(|p| p.ready) {
                    self.start_race().await;
                }
            }
            RoomMode::Lobby => {}
        }
    }

    async fn handle_start(&mut self, user_id: &str) {
        if !matches!(self.phase, Phase::Lobby) {
            return;
        }
        if self.owner_id.as_deref() != Some(user_id) {
            self.send_to(user_id, &ServerMessage::Error {
                message: "only the room owner can start the race".into(),
            });
            return;
        }
        if !self.participants.iter().any(|p| p.ready) {
            self.send_to(user_id, &ServerMessage::Error {
                message: "no participant is ready".into(),
            });
            return;
        }
        self.start_race().await;
    }

    /// Lobby -> Countdown: select and attach the race text, arm the timer,
    /// and reveal the text with a shared start timestamp. A provider failure
    /// keeps the room in Lobby.
    async fn start_race(&mut self) {
        if !matches!(self.phase, Phase::Lobby) {
            return;
        }

        let text = match self
            .storage
            .fetch_text(&self.settings.language, &self.settings.category, None)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(room_id = %self.id, error = %e, "race text unavailable, staying in lobby");
                self.broadcast(&ServerMessage::Error {
                    message: GameError::TextUnavailable.to_string(),
                });
                return;
            }
        };

        let countdown = self.cfg.countdown();
        let start_time = Utc::now()
            + chrono::Duration::from_std(countdown).unwrap_or_else(|_| chrono::Duration::zero());
        self.phase = Phase::Countdown {
            deadline: Instant::now() + countdown,
        };
        info!(room_id = %self.id, text_id = text.id, "countdown armed");

        self.broadcast(&ServerMessage::GameStart {
            text: text.content.clone(),
            start_time,
        });
        self.text = Some(text);
    }

    /// Countdown -> Game: begin accepting input.
    fn begin_race(&mut self) {
        self.phase = Phase::Game {
            started: Instant::now(),
        };
        info!(room_id = %self.id, "race started");
        self.broadcast_progress();
    }

    async fn handle_input(&mut self, user_id: &str, payload: InputPayload) {
        let Phase::Game { started } = self.phase else {
            return; // wrong state: no-op, never fatal
        };
        let Some(text_len) = self.text.as_ref().map(RaceText::char_count) else {
            return;
        };
        let Some(p) = self
            .participants
            .iter_mut()
            .find(|p| p.identity.user_id == user_id)
        else {
            return;
        };
        if p.finished() || p.abandoned {
            return;
        }
        // Only the next character advances; duplicates and jumps are
        // ignored so a replayed or reordered frame cannot corrupt progress.
        if payload.current_index != p.progress + 1 || payload.current_index > text_len {
            return;
        }

        p.progress = payload.current_index;
        p.wpm = words_per_minute(p.progress, started.elapsed());
        p.accuracy = payload.accuracy.min(100);
        p.last_activity = Instant::now();

        if p.progress == text_len {
            p.finished_at = Some(Instant::now());
            debug!(room_id = %self.id, user_id, "participant finished");
        }
        self.maybe_finish().await;
    }

    fn handle_update_settings(&mut self, user_id: &str, payload: SettingsPayload) {
        if !matches!(self.phase, Phase::Lobby) || self.owner_id.as_deref() != Some(user_id) {
            return;
        }
        if self.mode == RoomMode::Matchmaking {
            // Pool rooms were matched on these settings; edits would strand
            // members in a room they never asked for.
            self.send_to(user_id, &ServerMessage::Error {
                message: "matchmaking room settings are fixed".into(),
            });
            return;
        }
        if self.mode == RoomMode::Solo && payload.max_players != 1 {
            self.send_to(user_id, &ServerMessage::Error {
                message: "solo rooms have a single seat".into(),
            });
            return;
        }
        match self.settings.apply(&payload, self.participants.len()) {
            Ok(()) => {
                self.broadcast(&ServerMessage::UpdateSettings(self.settings.to_payload()));
            }
            Err(e) => {
                self.send_to(user_id, &ServerMessage::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn handle_chat(&mut self, user_id: &str, payload: ChatPayload) {
        let Some(sender) = self
            .participants
            .iter()
            .find(|p| p.identity.user_id == user_id)
        else {
            return;
        };
        let msg = ServerMessage::ChatMessage {
            sender_name: sender.identity.username.clone(),
            text: payload.text,
        };
        self.broadcast(&msg);
    }

    /// Game -> Finished once every seat is finished or abandoned.
    async fn maybe_finish(&mut self) {
        if !matches!(self.phase, Phase::Game { .. }) {
            return;
        }
        if self.participants.is_empty()
            || !self.participants.iter().all(|p| p.finished() || p.abandoned)
        {
            return;
        }
        self.finish_race().await;
    }

    async fn finish_race(&mut self) {
        // Rank: finishers by elapsed time (ties by fewer implied errors),
        // then abandoned seats by how far they got.
        let mut order: Vec<usize> = (0..self.participants.len()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (&self.participants[a], &self.participants[b]);
            match (pa.abandoned, pb.abandoned) {
                (false, true) => std::cmp::Ordering::Less,
                (true, false) => std::cmp::Ordering::Greater,
                (true, true) => pb.progress.cmp(&pa.progress),
                (false, false) => pa
                    .finished_at
                    .cmp(&pb.finished_at)
                    .then_with(|| pa.implied_errors().cmp(&pb.implied_errors())),
            }
        });

        let mut standings = Vec::with_capacity(order.len());
        for (rank0, &idx) in order.iter().enumerate() {
            let p = &self.participants[idx];
            let rating = match self.storage.rating(&p.identity.user_id).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(room_id = %self.id, user_id = %p.identity.user_id, error = %e,
                          "rating lookup failed, using default");
                    crate::db::DEFAULT_RATING
                }
            };
            standings.push(Standing {
                rating,
                rank: rank0 as u32 + 1,
                abandoned: p.abandoned,
            });
        }
        let deltas = rating::race_deltas(&standings);

        let results: Vec<MatchResult> = order
            .iter()
            .zip(standings.iter().zip(deltas.iter()))
            .map(|(&idx, (standing, &delta))| {
                let p = &self.participants[idx];
                MatchResult {
                    user_id: p.identity.user_id.clone(),
                    username: p.identity.username.clone(),
                    wpm: p.wpm,
                    accuracy: f64::from(p.accuracy),
                    rank: standing.rank,
                    rating_delta: delta,
                }
            })
            .collect();

        if let Some(text) = &self.text {
            if let Err(e) = self.storage.save_match(text.id, &results).await {
                // The in-memory outcome still goes out; persistence failure
                // must not eat the race result.
                warn!(room_id = %self.id, error = %e, "failed to persist match results");
                self.broadcast(&ServerMessage::Error {
                    message: "results could not be saved".into(),
                });
            }
        }

        self.broadcast(&ServerMessage::GameEnd {
            results: results
                .iter()
                .map(|r| RaceResult {
                    user_id: r.user_id.clone(),
                    username: r.username.clone(),
                    wpm: r.wpm,
                    accuracy: r.accuracy.round() as u32,
                })
                .collect(),
        });

        self.phase = Phase::Finished {
            retire_at: Instant::now() + self.cfg.finished_grace(),
        };
        info!(room_id = %self.id, participants = results.len(), "race finished");
    }

    fn broadcast_progress(&self) {
        let snapshot: Vec<PlayerProgress> = self
            .participants
            .iter()
            .map(|p| PlayerProgress {
                user_id: p.identity.user_id.clone(),
                username: p.identity.username.clone(),
                progress: p.progress,
                wpm: p.wpm,
            })
            .collect();
        self.broadcast(&ServerMessage::StateUpdate(snapshot));
    }

    fn roster(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .filter(|p| !p.abandoned)
            .map(|p| RosterEntry {
                user_id: p.identity.user_id.clone(),
                username: p.identity.username.clone(),
                is_owner: self.owner_id.as_deref() == Some(p.identity.user_id.as_str()),
            })
            .collect()
    }

    fn broadcast(&self, msg: &ServerMessage) {
        for p in &self.participants {
            if !p.abandoned {
                p.send(msg);
            }
        }
    }

    fn send_to(&self, user_id: &str, msg: &ServerMessage) {
        if let Some(p) = self
            .participants
            .iter()
            .find(|p| p.identity.user_id == user_id)
        {
            p.send(msg);
        }
    }
}
