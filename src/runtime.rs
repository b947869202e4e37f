//! Runtime events emitted by a session for UI and observability.
//!
//! Sent on a `tokio::sync::broadcast` channel; sending never blocks and a
//! session with no listeners loses nothing it needs. Session logging and
//! persistence attach here as fire-and-forget listeners.

use crate::error::Stage;
use crate::pipeline::messages::{ControlEvent, TurnId};
use crate::pipeline::state::SessionPhase;
use crate::pipeline::turn::TurnAbandonReason;
use std::time::Duration;

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Low-latency control events (speech start/end, playback start/end).
    Control(ControlEvent),
    /// The controller changed phase.
    PhaseChanged(SessionPhase),
    /// A sealed utterance started a turn.
    TurnStarted {
        /// New turn.
        turn_id: TurnId,
        /// Length of the utterance.
        utterance: Duration,
    },
    /// User transcription for a turn.
    Transcription {
        /// Owning turn.
        turn_id: TurnId,
        /// Recognized text.
        text: String,
    },
    /// Assistant reply, pause markers stripped for display.
    AssistantReply {
        /// Owning turn.
        turn_id: TurnId,
        /// Display text.
        text: String,
    },
    /// Structured data the reply service extracted.
    StructuredExtract {
        /// Owning turn.
        turn_id: TurnId,
        /// Opaque payload.
        value: serde_json::Value,
    },
    /// All reply audio for the turn played.
    TurnCompleted {
        /// Finished turn.
        turn_id: TurnId,
    },
    /// The turn ended without a reply being played in full.
    TurnAbandoned {
        /// Abandoned turn.
        turn_id: TurnId,
        /// Why.
        reason: TurnAbandonReason,
    },
    /// The user interrupted playback.
    BargeIn {
        /// Turn whose reply was cut off.
        turn_id: Option<TurnId>,
    },
    /// Unplayed segments were dropped to keep the queue bounded.
    QueueOverflow {
        /// Turn whose segments were dropped.
        turn_id: TurnId,
        /// Number dropped.
        dropped: usize,
    },
    /// A speech burst was too short to be an utterance.
    UtteranceDiscarded {
        /// Voiced length of the burst.
        voiced: Duration,
    },
    /// Microphone liveness: false when nothing but silence arrived for a while.
    MicStatus {
        /// Whether real audio is arriving.
        active: bool,
    },
    /// A turn-scoped failure, reported for display.
    SessionError {
        /// Stage that failed, if an external call.
        stage: Option<Stage>,
        /// Failure detail.
        message: String,
    },
}
