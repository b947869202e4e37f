//! Error types for the parley turn-taking pipeline.

/// Pipeline stage an external call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Speech-to-text request.
    Transcription,
    /// Reply generation request.
    Reply,
    /// Text-to-speech request.
    Synthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcription => f.write_str("transcription"),
            Self::Reply => f.write_str("reply"),
            Self::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// Top-level error type for a voice session.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Microphone missing, blocked or refused. Terminal for the session.
    #[error("microphone unavailable: {0}")]
    PermissionDenied(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// An external service call failed.
    #[error("{stage} request failed: {message}")]
    Transport {
        /// Which call failed.
        stage: Stage,
        /// Failure detail.
        message: String,
    },

    /// An external service call exceeded its time budget.
    #[error("{stage} request timed out after {after_ms}ms")]
    Timeout {
        /// Which call timed out.
        stage: Stage,
        /// Configured budget in milliseconds.
        after_ms: u64,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Shorthand for a [`SpeechError::Transport`].
    pub fn transport(stage: Stage, message: impl Into<String>) -> Self {
        Self::Transport {
            stage,
            message: message.into(),
        }
    }

    /// Whether this error ends the whole session rather than a single turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    /// Whether this error is an external-call failure (error or timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
