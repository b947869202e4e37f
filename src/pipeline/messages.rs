//! Message types passed between pipeline components.

use bytes::Bytes;
use std::time::{Duration, Instant};

/// Identifier of one conversational turn.
///
/// Minted only by [`TurnController::begin_turn`](crate::pipeline::turn::TurnController::begin_turn);
/// ids are strictly increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub(crate) u64);

impl TurnId {
    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-size chunk of mono microphone samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// f32 samples in \[-1, 1\], mono, at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Monotonic sequence number assigned by the capture source.
    pub seq: u64,
    /// Timestamp when this frame was captured.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Wall-clock length of the frame.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// RMS energy of the frame.
    pub fn rms(&self) -> f32 {
        compute_rms_energy(&self.samples)
    }
}

/// A sealed utterance: the frames between speech start and speech end.
///
/// Immutable once produced by the segmenter; ownership moves to the
/// controller, which is its only reader.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<f32>,
    sample_rate: u32,
    started_at: Instant,
    first_seq: u64,
    last_seq: u64,
}

impl Utterance {
    pub(crate) fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        started_at: Instant,
        first_seq: u64,
        last_seq: u64,
    ) -> Self {
        Self {
            samples,
            sample_rate,
            started_at,
            first_seq,
            last_seq,
        }
    }

    /// Concatenated samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Captured duration.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Capture time of the first frame.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Sequence numbers of the first and last frame included.
    pub fn seq_range(&self) -> (u64, u64) {
        (self.first_seq, self.last_seq)
    }
}

/// One ordered piece of a reply, ready for the speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSegment {
    /// Text spoken in this segment (may be empty for a pure pause).
    pub text: String,
    /// Encoded audio (WAV). Empty for a pure pause.
    pub audio: Bytes,
    /// Silence played before the audio, in milliseconds.
    pub pause_before_ms: u64,
    /// Turn this segment belongs to.
    pub turn_id: TurnId,
}

/// Bytes per second assumed for payloads whose header cannot be read
/// (16-bit mono PCM at 24kHz).
const FALLBACK_BYTES_PER_SEC: u64 = 48_000;

impl PlaybackSegment {
    /// Estimated time from segment start to segment end, pause included.
    pub fn estimated_duration(&self) -> Duration {
        let audio = if self.audio.is_empty() {
            Duration::ZERO
        } else {
            crate::audio::wav::payload_duration(&self.audio).unwrap_or_else(|| {
                Duration::from_millis(self.audio.len() as u64 * 1000 / FALLBACK_BYTES_PER_SEC)
            })
        };
        Duration::from_millis(self.pause_before_ms) + audio
    }
}

/// Low-latency control events emitted by the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// VAD switched to speech.
    UserSpeechStart {
        /// Capture time of the frame that flipped the state.
        captured_at: Instant,
        /// Smoothed RMS energy at the flip.
        rms: f32,
    },
    /// VAD switched back to silence.
    UserSpeechEnd,
    /// First segment of a turn started sounding.
    AssistantSpeechStart {
        /// Turn being played.
        turn_id: TurnId,
    },
    /// Playback stopped, either drained or interrupted.
    AssistantSpeechEnd {
        /// Turn that was playing.
        turn_id: TurnId,
        /// True when stopped by barge-in rather than finishing.
        interrupted: bool,
    },
}

pub(crate) fn samples_to_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(len as u64 * 1_000_000 / u64::from(sample_rate))
}

/// Compute RMS energy of audio samples.
pub(crate) fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
