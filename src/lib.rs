//! Parley: turn-taking and audio pipeline control for voice agents.
//!
//! A session listens to the microphone, cuts the audio into utterances,
//! and hands each one to external services in turn:
//! Microphone → VAD → segmenter → transcription → reply → synthesis → speaker
//!
//! # Architecture
//!
//! - **Audio capture**: fixed-size frames from the microphone via `cpal`
//! - **VAD**: energy-based speech detection, suppressed while the assistant talks
//! - **Segmenter**: turns speech/silence decisions into sealed utterances
//! - **Turns**: every utterance gets a monotonically increasing turn id, and
//!   results for anything but the current turn are dropped
//! - **Services**: transcription, reply and synthesis over HTTP
//! - **Playback**: a bounded, interruptible queue in front of the speaker
//! - **Barge-in**: user speech over the assistant cuts playback at once

pub mod audio;
pub mod config;
pub mod error;
mod http;
pub mod llm;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod tts;
pub mod vad;

pub use config::SpeechConfig;
pub use error::{Result, SpeechError, Stage};
pub use pipeline::coordinator::{FlushHandle, SessionController, SessionServices};
pub use pipeline::messages::{AudioFrame, ControlEvent, PlaybackSegment, TurnId, Utterance};
pub use pipeline::state::{SessionAudioState, SessionPhase};
pub use pipeline::turn::{TurnAbandonReason, TurnController};
pub use runtime::RuntimeEvent;
