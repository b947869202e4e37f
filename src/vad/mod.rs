//! Voice activity detection using smoothed RMS energy.
//!
//! Classification runs once per captured frame with no I/O. A suppression
//! window hides the assistant's own voice from the detector: while it is
//! open, ordinary speech energy is ignored and only a sustained signal above
//! the override threshold counts, so a deliberate interruption still gets
//! through.

pub mod segmenter;

use crate::config::VadConfig;
use crate::pipeline::messages::AudioFrame;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Classification of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadOutput {
    /// Whether the frame counts as user speech.
    pub is_speech: bool,
    /// Rolling-average RMS energy the decision was based on.
    pub rms: f32,
    /// Whether the frame fell inside a suppression window.
    pub suppressed: bool,
}

/// Energy-based voice activity detector with time-boxed self-suppression.
pub struct VoiceActivityDetector {
    volume_threshold: f32,
    override_threshold: f32,
    override_min: Duration,
    suppress_buffer: Duration,
    window: VecDeque<f32>,
    window_len: usize,
    /// Frames inside this deadline are suppressed.
    suppress_until: Option<Instant>,
    /// Continuous time spent above the override threshold while suppressed.
    override_run: Duration,
}

impl VoiceActivityDetector {
    /// Create a detector from configuration.
    pub fn new(config: &VadConfig) -> Self {
        let window_len = config.smoothing_frames.max(1);
        Self {
            volume_threshold: config.volume_threshold,
            override_threshold: config.override_threshold,
            override_min: Duration::from_millis(u64::from(config.override_min_ms)),
            suppress_buffer: Duration::from_millis(u64::from(config.suppress_buffer_ms)),
            window: VecDeque::with_capacity(window_len),
            window_len,
            suppress_until: None,
            override_run: Duration::ZERO,
        }
    }

    /// Classify one frame. The frame's capture time is used as "now".
    pub fn observe(&mut self, frame: &AudioFrame) -> VadOutput {
        let now = frame.captured_at;
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(frame.rms());
        let rms = self.window.iter().sum::<f32>() / self.window.len() as f32;

        let suppressed = self.is_suppressed(now);
        let is_speech = if suppressed {
            if rms > self.override_threshold {
                self.override_run += frame.duration();
                self.override_run >= self.override_min
            } else {
                self.override_run = Duration::ZERO;
                false
            }
        } else {
            self.override_run = Duration::ZERO;
            rms > self.volume_threshold
        };

        VadOutput {
            is_speech,
            rms,
            suppressed,
        }
    }

    /// Open (or extend) a suppression window covering `duration` from `now`,
    /// plus the configured latency buffer. Never shortens an open window.
    pub fn suppress_for(&mut self, duration: Duration, now: Instant) {
        let until = now + duration + self.suppress_buffer;
        self.suppress_until = Some(match self.suppress_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Whether frames captured at `now` are suppressed.
    pub fn is_suppressed(&self, now: Instant) -> bool {
        self.suppress_until.is_some_and(|t| now < t)
    }

    /// End of the current suppression window, if any.
    pub fn suppress_until(&self) -> Option<Instant> {
        self.suppress_until
    }

    /// Clear suppression and rolling state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.suppress_until = None;
        self.override_run = Duration::ZERO;
    }
}
