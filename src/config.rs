//! Configuration types for a voice session.

use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Audio capture/playback settings.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Utterance segmentation settings.
    pub segmenter: SegmenterConfig,
    /// Playback queue settings.
    pub playback: PlaybackConfig,
    /// Barge-in (interrupt) behavior while the assistant is speaking.
    pub barge_in: BargeInConfig,
    /// External transcription / reply / synthesis services.
    pub services: ServiceConfig,
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input sample rate in Hz.
    pub input_sample_rate: u32,
    /// Output sample rate in Hz.
    pub output_sample_rate: u32,
    /// Length of one captured frame in milliseconds.
    pub frame_ms: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            frame_ms: 20,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Number of mono samples in one captured frame.
    pub fn frame_samples(&self) -> usize {
        (self.input_sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy above which a frame counts as speech.
    ///
    /// Tune above ambient noise and above typical speaker leakage while the
    /// assistant is talking. Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.01: sensitive (quiet room, headset)
    ///   - 0.02: normal (default)
    ///   - 0.05: noisy room or loud open speakers
    pub volume_threshold: f32,
    /// RMS energy that pierces a suppression window.
    ///
    /// Must be well above `volume_threshold`; only deliberate, loud speech
    /// should reach it.
    pub override_threshold: f32,
    /// How long energy must stay above `override_threshold` (ms) before it
    /// counts as speech inside a suppression window.
    pub override_min_ms: u32,
    /// Number of frames in the rolling energy average.
    pub smoothing_frames: usize,
    /// Extra time added to every suppression window to cover synthesis and
    /// output-device latency.
    pub suppress_buffer_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            volume_threshold: 0.02,
            override_threshold: 0.12,
            override_min_ms: 200,
            smoothing_frames: 3,
            suppress_buffer_ms: 400,
        }
    }
}

/// Speech segmentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Silence gap (ms) that ends an utterance.
    pub speech_max_gap_ms: u32,
    /// Utterances shorter than this (ms) are discarded as noise.
    pub speech_min_duration_ms: u32,
    /// Hard cap on a single utterance (ms); reaching it seals the utterance.
    pub max_utterance_ms: u32,
    /// Audio kept from before speech onset and prepended to the utterance (ms).
    pub pre_roll_ms: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_max_gap_ms: 900,
            speech_min_duration_ms: 800,
            max_utterance_ms: 30_000,
            pre_roll_ms: 200,
        }
    }
}

/// Playback queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Maximum number of unplayed segments held in the queue.
    pub max_queue_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { max_queue_size: 2 }
    }
}

/// Barge-in configuration (user interrupts assistant by speaking).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Whether barge-in is enabled.
    pub enabled: bool,
    /// Ignore speech for a short window after assistant playback starts (ms).
    ///
    /// Speaker leakage right at playback start is the most common false trigger.
    pub assistant_start_holdoff_ms: u32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            assistant_start_holdoff_ms: 250,
        }
    }
}

/// External service endpoints and time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Transcription endpoint (receives WAV, returns JSON text).
    pub transcription_url: String,
    /// Reply generation endpoint.
    pub reply_url: String,
    /// Speech synthesis endpoint (returns audio bytes).
    pub synthesis_url: String,
    /// Bearer token sent to every service (empty = none).
    pub api_key: String,
    /// Optional reply mode forwarded to the reply service.
    pub reply_mode: Option<String>,
    /// Time budget for one transcription call (ms).
    pub transcription_timeout_ms: u64,
    /// Time budget for one reply call (ms).
    pub reply_timeout_ms: u64,
    /// Time budget for one synthesis call (ms).
    pub synthesis_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            transcription_url: "http://127.0.0.1:8000/v1/transcribe".to_owned(),
            reply_url: "http://127.0.0.1:8000/v1/reply".to_owned(),
            synthesis_url: "http://127.0.0.1:8000/v1/synthesize".to_owned(),
            api_key: String::new(),
            reply_mode: None,
            transcription_timeout_ms: 10_000,
            reply_timeout_ms: 20_000,
            synthesis_timeout_ms: 15_000,
        }
    }
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/parley/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("parley").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("parley")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/parley-config/config.toml")
        }
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SpeechError::Config(msg.to_owned()));

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return fail("audio sample rates must be non-zero");
        }
        if self.audio.frame_samples() == 0 {
            return fail("audio.frame_ms is too small for the input sample rate");
        }
        if self.vad.volume_threshold <= 0.0 {
            return fail("vad.volume_threshold must be positive");
        }
        if self.vad.override_threshold <= self.vad.volume_threshold {
            return fail("vad.override_threshold must exceed vad.volume_threshold");
        }
        if self.vad.smoothing_frames == 0 {
            return fail("vad.smoothing_frames must be at least 1");
        }
        if self.segmenter.max_utterance_ms <= self.segmenter.speech_min_duration_ms {
            return fail("segmenter.max_utterance_ms must exceed speech_min_duration_ms");
        }
        if self.playback.max_queue_size == 0 {
            return fail("playback.max_queue_size must be at least 1");
        }
        let s = &self.services;
        if s.transcription_timeout_ms == 0 || s.reply_timeout_ms == 0 || s.synthesis_timeout_ms == 0
        {
            return fail("service timeouts must be non-zero");
        }
        Ok(())
    }
}
