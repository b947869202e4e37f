//! Observable per-session audio state.

use crate::pipeline::messages::TurnId;
use std::time::Instant;

/// Where the session controller is in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Not capturing (before start or after shutdown).
    #[default]
    Idle,
    /// Capturing and waiting for an utterance.
    Listening,
    /// Waiting for the transcription.
    Transcribing,
    /// Waiting for the reply.
    GeneratingReply,
    /// Synthesizing reply audio before anything is audible.
    Synthesizing,
    /// Reply audio is playing.
    Playing,
    /// Playback was cut off by the user; capturing the interruption.
    Interrupted,
}

impl SessionPhase {
    /// Whether a turn is being worked on.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            Self::Transcribing | Self::GeneratingReply | Self::Synthesizing
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::GeneratingReply => "generating_reply",
            Self::Synthesizing => "synthesizing",
            Self::Playing => "playing",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// Snapshot of a session, published after every change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionAudioState {
    /// Microphone frames are being consumed.
    pub is_recording: bool,
    /// VAD currently reports user speech.
    pub is_speech_active: bool,
    /// Assistant audio is audible (or between segments of one reply).
    pub is_agent_speaking: bool,
    /// A turn is waiting on an external service.
    pub is_processing: bool,
    /// Turn in progress, if any.
    pub current_turn_id: Option<TurnId>,
    /// End of the VAD suppression window.
    pub suppress_until: Option<Instant>,
    /// Controller phase.
    pub phase: SessionPhase,
}

impl SessionAudioState {
    /// Back to plain listening: no turn, nothing playing, no suppression.
    pub fn reset_neutral(&mut self) {
        self.is_speech_active = false;
        self.is_agent_speaking = false;
        self.is_processing = false;
        self.current_turn_id = None;
        self.suppress_until = None;
        self.phase = if self.is_recording {
            SessionPhase::Listening
        } else {
            SessionPhase::Idle
        };
    }
}
