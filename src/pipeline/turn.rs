//! Turn identity and cancellation bookkeeping.
//!
//! Every asynchronous step is tagged with the [`TurnId`] it was started
//! under and must call [`TurnController::is_current`] before acting on its
//! result. Cancelling never aborts the request itself: a stale result is
//! simply ignored when it arrives.

use crate::error::Stage;
use crate::pipeline::messages::{TurnId, Utterance};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Value of `current` meaning "no turn in progress".
const NO_TURN: u64 = 0;

/// Progress of a turn through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for the transcription service.
    Transcribing,
    /// Waiting for the reply service.
    GeneratingReply,
    /// Waiting for speech synthesis.
    Synthesizing,
    /// Reply audio is on the speaker.
    Playing,
    /// All reply audio played.
    Completed,
    /// Dropped before completion.
    Abandoned,
}

/// Why a turn ended without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAbandonReason {
    /// The transcription came back empty (silence or noise).
    EmptyTranscription,
    /// An external call failed or timed out.
    TransportFailure {
        /// Stage that failed.
        stage: Stage,
        /// Failure detail.
        message: String,
    },
    /// The user barged in over the reply.
    Interrupted,
}

/// Snapshot of the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Turn identifier.
    pub id: TurnId,
    /// When the turn began.
    pub created_at: Instant,
    /// Progress.
    pub state: TurnState,
    /// Length of the utterance that started the turn.
    pub utterance_duration: Duration,
    /// Transcribed user text, once known.
    pub utterance_text: Option<String>,
    /// Reply text with pause markers stripped, once known.
    pub reply_text: Option<String>,
}

struct TurnInner {
    /// Highest id ever minted.
    last_id: AtomicU64,
    /// Id of the current turn, or `NO_TURN`.
    current: AtomicU64,
    record: Mutex<Option<Turn>>,
}

/// Mints turn ids and answers "is this turn still current?".
///
/// Cheap to clone; clones share state so spawned workers can check
/// staleness without going through the controller.
#[derive(Clone)]
pub struct TurnController {
    inner: Arc<TurnInner>,
}

impl Default for TurnController {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnController {
    /// Create a controller with no turns yet.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TurnInner {
                last_id: AtomicU64::new(NO_TURN),
                current: AtomicU64::new(NO_TURN),
                record: Mutex::new(None),
            }),
        }
    }

    /// Start a new turn for `utterance`. Any previous turn becomes stale.
    pub fn begin_turn(&self, utterance: &Utterance) -> TurnId {
        let id = self.inner.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.current.store(id, Ordering::SeqCst);
        let turn = Turn {
            id: TurnId(id),
            created_at: Instant::now(),
            state: TurnState::Transcribing,
            utterance_duration: utterance.duration(),
            utterance_text: None,
            reply_text: None,
        };
        if let Ok(mut record) = self.inner.record.lock() {
            *record = Some(turn);
        }
        TurnId(id)
    }

    /// Whether `id` is the turn in progress.
    pub fn is_current(&self, id: TurnId) -> bool {
        id.0 != NO_TURN && self.inner.current.load(Ordering::SeqCst) == id.0
    }

    /// The turn in progress, if any.
    pub fn current(&self) -> Option<TurnId> {
        match self.inner.current.load(Ordering::SeqCst) {
            NO_TURN => None,
            id => Some(TurnId(id)),
        }
    }

    /// Most recently minted id, current or not.
    pub fn last_minted(&self) -> Option<TurnId> {
        match self.inner.last_id.load(Ordering::SeqCst) {
            NO_TURN => None,
            id => Some(TurnId(id)),
        }
    }

    /// Abandon the turn in progress without minting a new id.
    ///
    /// Returns the id that was cancelled.
    pub fn cancel_current(&self) -> Option<TurnId> {
        let id = self.inner.current.swap(NO_TURN, Ordering::SeqCst);
        if id == NO_TURN {
            return None;
        }
        self.with_record(TurnId(id), |t| t.state = TurnState::Abandoned);
        debug!("turn {id}: cancelled");
        Some(TurnId(id))
    }

    /// Mark `id` completed. No-op if it is no longer current.
    pub fn complete(&self, id: TurnId) -> bool {
        if self
            .inner
            .current
            .compare_exchange(id.0, NO_TURN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.with_record(id, |t| t.state = TurnState::Completed);
        true
    }

    /// Move `id` to `state`. No-op (returns false) if stale.
    pub fn advance(&self, id: TurnId, state: TurnState) -> bool {
        self.is_current(id) && self.with_record(id, |t| t.state = state)
    }

    /// Attach the transcription to `id`. No-op if stale.
    pub fn record_utterance_text(&self, id: TurnId, text: &str) -> bool {
        self.is_current(id) && self.with_record(id, |t| t.utterance_text = Some(text.to_owned()))
    }

    /// Attach the display reply text to `id`. No-op if stale.
    pub fn record_reply_text(&self, id: TurnId, text: &str) -> bool {
        self.is_current(id) && self.with_record(id, |t| t.reply_text = Some(text.to_owned()))
    }

    /// Snapshot of the latest turn record (current or just finished).
    pub fn snapshot(&self) -> Option<Turn> {
        self.inner.record.lock().ok().and_then(|r| r.clone())
    }

    fn with_record(&self, id: TurnId, f: impl FnOnce(&mut Turn)) -> bool {
        let Ok(mut record) = self.inner.record.lock() else {
            return false;
        };
        match record.as_mut() {
            Some(turn) if turn.id == id => {
                f(turn);
                true
            }
            _ => false,
        }
    }
}
