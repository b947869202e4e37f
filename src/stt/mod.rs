//! Speech-to-text through an external transcription service.
//!
//! The service receives the utterance as a WAV body and answers with JSON
//! `{"text": "...", "duration_ms": N}`. Empty text is a valid answer
//! (silence or noise) and is not an error.

use crate::config::ServiceConfig;
use crate::error::{Result, SpeechError, Stage};
use crate::http::Endpoint;
use crate::pipeline::messages::TurnId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

/// Transcription of one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TranscriptionResult {
    /// Recognized text; may be empty.
    #[serde(default)]
    pub text: String,
    /// Audio duration the service reports, in milliseconds.
    #[serde(default, alias = "durationMs")]
    pub duration_ms: u64,
}

/// Request/response transcription collaborator.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe WAV-encoded `audio` recorded for `turn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Transport`] when the service cannot be reached
    /// or answers with an error.
    async fn transcribe(&self, audio: Bytes, turn_id: TurnId) -> Result<TranscriptionResult>;
}

/// [`TranscriptionClient`] backed by an HTTP endpoint.
pub struct HttpTranscriptionClient {
    endpoint: Endpoint,
}

impl HttpTranscriptionClient {
    /// Create a client for `services.transcription_url`.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            endpoint: Endpoint::new(
                Stage::Transcription,
                &config.transcription_url,
                &config.api_key,
            ),
        }
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(&self, audio: Bytes, turn_id: TurnId) -> Result<TranscriptionResult> {
        debug!("turn {turn_id}: sending {} bytes for transcription", audio.len());
        let request = self
            .endpoint
            .post(turn_id)
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(audio);
        let response = self.endpoint.send(request).await?;
        let result: TranscriptionResult = response.json().await.map_err(|e| {
            SpeechError::transport(Stage::Transcription, format!("invalid response: {e}"))
        })?;
        Ok(TranscriptionResult {
            text: result.text.trim().to_owned(),
            ..result
        })
    }
}
