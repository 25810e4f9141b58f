//! Per-participant live state within a room.

use crate::auth::Identity;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;
use uplink_proto::ServerMessage;

/// Capacity of each participant's outbound queue. A full queue means the
/// consumer is slow; frames are dropped rather than stalling the room
/// driver, and the next broadcast tick carries fresh state anyway.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// A connected participant's mutable race state. Owned by the room actor;
/// the connection task only holds the receiving end of the outbound queue.
#[derive(Debug)]
pub struct Participant {
    pub identity: Identity,
    outbound: mpsc::Sender<ServerMessage>,
    pub ready: bool,
    /// Count of correctly typed characters. Non-decreasing within a race.
    pub progress: usize,
    /// Server-computed WPM from the last accepted input.
    pub wpm: u32,
    /// Client-reported accuracy percentage from the last accepted input.
    pub accuracy: u32,
    pub finished_at: Option<Instant>,
    pub abandoned: bool,
    /// When this participant last produced an accepted input.
    pub last_activity: Instant,
}

impl Participant {
    pub fn new(identity: Identity, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Participant {
            identity,
            outbound,
            ready: false,
            progress: 0,
            wpm: 0,
            accuracy: 100,
            finished_at: None,
            abandoned: false,
            last_activity: Instant::now(),
        }
    }

    pub fn finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Queue an outbound frame, dropping it if the consumer is backed up.
    pub fn send(&self, msg: &ServerMessage) {
        if let Err(e) = self.outbound.try_send(msg.clone()) {
            trace!(user_id = %self.identity.user_id, error = %e, "outbound frame dropped");
        }
    }

    /// Error count implied by the reported accuracy:
    /// accuracy = correct / (correct + errors) * 100.
    pub fn implied_errors(&self) -> u32 {
        if self.accuracy == 0 || self.accuracy >= 100 || self.progress == 0 {
            return 0;
        }
        let correct = self.progress as f64;
        let acc = f64::from(self.accuracy) / 100.0;
        (correct / acc - correct).round() as u32
    }
}

/// Words-per-minute for `chars` correctly typed characters over `elapsed`:
/// (chars / 5) / minutes. Returns 0 until measurable time has passed.
pub fn words_per_minute(chars: usize, elapsed: Duration) -> u32 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        return 0;
    }
    ((chars as f64 / 5.0) / minutes).round() as u32
}
