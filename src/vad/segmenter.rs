//! Speech segmentation: turns a classified frame stream into utterances.
//!
//! `Idle → Accumulating → (seal | discard) → Idle`. An utterance ends when
//! the silence gap after the last speech frame exceeds `speech_max_gap_ms`,
//! when it reaches `max_utterance_ms`, or on an explicit flush. Anything
//! with less than `speech_min_duration_ms` of voiced audio is dropped as
//! noise and never reaches the turn controller.

use crate::config::SegmenterConfig;
use crate::pipeline::messages::{AudioFrame, Utterance, samples_to_duration};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Segmenter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech in progress.
    Idle,
    /// Collecting frames of an utterance.
    Accumulating,
}

/// Result of feeding a frame (or polling) when a segment closes.
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// A complete utterance.
    Sealed(Utterance),
    /// Too short to be speech; dropped.
    Discarded {
        /// Voiced duration that fell short of the minimum.
        voiced: Duration,
    },
}

/// Buffers speech frames and emits complete utterances.
pub struct SpeechSegmenter {
    max_gap: Duration,
    min_voiced: Duration,
    max_utterance: Duration,
    pre_roll: Duration,
    state: SegmenterState,
    /// Recent non-speech frames kept for onset padding.
    pre_roll_frames: VecDeque<AudioFrame>,
    buffer: Vec<f32>,
    sample_rate: u32,
    started_at: Option<Instant>,
    first_seq: u64,
    last_seq: u64,
    /// Samples of pre-roll at the head of `buffer`.
    pre_roll_len: usize,
    /// Buffer length right after the most recent speech frame.
    voiced_end: usize,
    last_speech_at: Option<Instant>,
}

impl SpeechSegmenter {
    /// Create a segmenter from configuration.
    pub fn new(config: &SegmenterConfig) -> Self {
        let ms = |v: u32| Duration::from_millis(u64::from(v));
        Self {
            max_gap: ms(config.speech_max_gap_ms),
            min_voiced: ms(config.speech_min_duration_ms),
            max_utterance: ms(config.max_utterance_ms),
            pre_roll: ms(config.pre_roll_ms),
            state: SegmenterState::Idle,
            pre_roll_frames: VecDeque::new(),
            buffer: Vec::new(),
            sample_rate: 0,
            started_at: None,
            first_seq: 0,
            last_seq: 0,
            pre_roll_len: 0,
            voiced_end: 0,
            last_speech_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Feed one classified frame.
    pub fn feed(&mut self, frame: AudioFrame, is_speech: bool) -> Option<SegmenterEvent> {
        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.start(frame);
                } else {
                    self.remember_pre_roll(frame);
                }
                None
            }
            SegmenterState::Accumulating => {
                let at = frame.captured_at;
                self.last_seq = frame.seq;
                self.buffer.extend_from_slice(&frame.samples);
                if is_speech {
                    self.voiced_end = self.buffer.len();
                    self.last_speech_at = Some(at);
                }

                if samples_to_duration(self.buffer.len(), self.sample_rate) >= self.max_utterance {
                    debug!("utterance reached {}ms cap", self.max_utterance.as_millis());
                    return Some(self.finish(false));
                }
                self.check_gap(at)
            }
        }
    }

    /// Close the current utterance if the silence gap has elapsed by `now`.
    ///
    /// Lets the controller end an utterance even if frames stop arriving.
    pub fn poll(&mut self, now: Instant) -> Option<SegmenterEvent> {
        if self.state == SegmenterState::Accumulating {
            self.check_gap(now)
        } else {
            None
        }
    }

    /// Force the current utterance closed.
    pub fn flush(&mut self) -> Option<SegmenterEvent> {
        if self.state == SegmenterState::Accumulating {
            Some(self.finish(false))
        } else {
            None
        }
    }

    /// Drop any partial utterance and pre-roll.
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.pre_roll_frames.clear();
        self.started_at = None;
        self.last_speech_at = None;
        self.pre_roll_len = 0;
        self.voiced_end = 0;
    }

    fn start(&mut self, frame: AudioFrame) {
        self.state = SegmenterState::Accumulating;
        self.sample_rate = frame.sample_rate;
        self.buffer.clear();

        let mut started_at = frame.captured_at;
        let mut first_seq = frame.seq;
        for pad in self.pre_roll_frames.drain(..) {
            if self.buffer.is_empty() {
                started_at = pad.captured_at;
                first_seq = pad.seq;
            }
            self.buffer.extend_from_slice(&pad.samples);
        }
        self.pre_roll_len = self.buffer.len();
        self.buffer.extend_from_slice(&frame.samples);

        self.started_at = Some(started_at);
        self.first_seq = first_seq;
        self.last_seq = frame.seq;
        self.voiced_end = self.buffer.len();
        self.last_speech_at = Some(frame.captured_at);
    }

    fn remember_pre_roll(&mut self, frame: AudioFrame) {
        if self.pre_roll.is_zero() {
            return;
        }
        self.pre_roll_frames.push_back(frame);
        let mut total: Duration = self.pre_roll_frames.iter().map(AudioFrame::duration).sum();
        while total > self.pre_roll {
            match self.pre_roll_frames.pop_front() {
                Some(old) => total = total.saturating_sub(old.duration()),
                None => break,
            }
        }
    }

    fn check_gap(&mut self, now: Instant) -> Option<SegmenterEvent> {
        let last = self.last_speech_at?;
        if now.saturating_duration_since(last) > self.max_gap {
            Some(self.finish(true))
        } else {
            None
        }
    }

    /// Seal or discard the buffered audio and return to idle.
    fn finish(&mut self, trim_trailing_silence: bool) -> SegmenterEvent {
        let voiced_samples = self.voiced_end.saturating_sub(self.pre_roll_len);
        let voiced = samples_to_duration(voiced_samples, self.sample_rate);

        let mut samples = std::mem::take(&mut self.buffer);
        if trim_trailing_silence {
            samples.truncate(self.voiced_end);
        }
        let started_at = self.started_at.take();
        let (first_seq, last_seq) = (self.first_seq, self.last_seq);
        self.state = SegmenterState::Idle;
        self.last_speech_at = None;
        self.pre_roll_len = 0;
        self.voiced_end = 0;

        match started_at {
            Some(started_at) if voiced >= self.min_voiced => SegmenterEvent::Sealed(Utterance::new(
                samples,
                self.sample_rate,
                started_at,
                first_seq,
                last_seq,
            )),
            _ => SegmenterEvent::Discarded { voiced },
        }
    }
}
