//! Barge-in: the user talking over the assistant.
//!
//! Armed only while the assistant is audible. When user speech arrives the
//! coordinator interrupts playback, clears the detector (including its
//! suppression window, so the interrupting words are captured at once) and
//! cancels the turn being played. All three happen inside one call on the
//! controller task, so no playback callback can slip in between.

use crate::config::BargeInConfig;
use crate::pipeline::messages::TurnId;
use crate::pipeline::queue::PlaybackQueue;
use crate::pipeline::turn::TurnController;
use crate::vad::VoiceActivityDetector;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Components a barge-in acts on.
pub struct BargeInContext<'a> {
    /// Playback to interrupt.
    pub queue: &'a mut PlaybackQueue,
    /// Detector to reset.
    pub vad: &'a mut VoiceActivityDetector,
    /// Turns to cancel.
    pub turns: &'a TurnController,
}

/// What happened to one speech-activity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInDecision {
    /// Assistant not speaking, or activity went inactive.
    NotArmed,
    /// Barge-in is switched off.
    Disabled,
    /// Too soon after playback started; likely speaker leakage.
    HoldOff,
    /// Playback interrupted.
    Interrupted {
        /// Turn whose playback was cut.
        playback_turn: Option<TurnId>,
        /// Turn cancelled as a result.
        cancelled_turn: Option<TurnId>,
    },
}

/// Watches speech activity while the assistant is talking.
pub struct BargeInCoordinator {
    enabled: bool,
    holdoff: Duration,
    armed: bool,
    playback_started_at: Option<Instant>,
}

impl BargeInCoordinator {
    /// Create a coordinator from configuration.
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            enabled: config.enabled,
            holdoff: Duration::from_millis(u64::from(config.assistant_start_holdoff_ms)),
            armed: false,
            playback_started_at: None,
        }
    }

    /// Whether the assistant is currently speaking.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Assistant audio became audible.
    pub fn on_playback_started(&mut self, now: Instant) {
        self.armed = true;
        self.playback_started_at = Some(now);
    }

    /// Assistant audio stopped, by draining or by interruption.
    pub fn on_playback_stopped(&mut self) {
        self.armed = false;
        self.playback_started_at = None;
    }

    /// React to VAD speech activity.
    pub fn on_speech_activity_changed(
        &mut self,
        is_active: bool,
        now: Instant,
        ctx: BargeInContext<'_>,
    ) -> BargeInDecision {
        if !is_active || !self.armed {
            return BargeInDecision::NotArmed;
        }
        if !self.enabled {
            return BargeInDecision::Disabled;
        }
        if self.within_holdoff(now) {
            debug!("speech during assistant start hold-off, ignoring");
            return BargeInDecision::HoldOff;
        }

        let playback_turn = ctx.queue.interrupt();
        ctx.vad.reset();
        let cancelled_turn = ctx.turns.cancel_current();
        self.on_playback_stopped();

        match playback_turn.or(cancelled_turn) {
            Some(turn) => info!("turn {turn}: barge-in, playback interrupted"),
            None => info!("barge-in, playback interrupted"),
        }
        BargeInDecision::Interrupted {
            playback_turn,
            cancelled_turn,
        }
    }

    fn within_holdoff(&self, now: Instant) -> bool {
        let Some(t0) = self.playback_started_at else {
            return false;
        };
        !self.holdoff.is_zero() && now.saturating_duration_since(t0) < self.holdoff
    }
}
