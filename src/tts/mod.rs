//! Text-to-speech through an external synthesis service.
//!
//! Request: JSON `{"text", "turn_id"}`. Response: the encoded audio as the
//! raw response body (WAV).

use crate::config::ServiceConfig;
use crate::error::{Result, SpeechError, Stage};
use crate::http::Endpoint;
use crate::pipeline::messages::TurnId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

/// Synthesized audio for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisResult {
    /// Encoded audio.
    pub audio: Bytes,
}

/// Request/response synthesis collaborator.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Synthesize `text` for `turn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Transport`] when the service cannot be reached,
    /// answers with an error, or returns no audio.
    async fn synthesize(&self, text: &str, turn_id: TurnId) -> Result<SynthesisResult>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    turn_id: u64,
}

/// [`SynthesisClient`] backed by an HTTP endpoint.
pub struct HttpSynthesisClient {
    endpoint: Endpoint,
}

impl HttpSynthesisClient {
    /// Create a client for `services.synthesis_url`.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            endpoint: Endpoint::new(Stage::Synthesis, &config.synthesis_url, &config.api_key),
        }
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(&self, text: &str, turn_id: TurnId) -> Result<SynthesisResult> {
        debug!("turn {turn_id}: synthesizing {} chars", text.len());
        let request = self.endpoint.post(turn_id).json(&SynthesisRequest {
            text,
            turn_id: turn_id.get(),
        });
        let response = self.endpoint.send(request).await?;
        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::transport(Stage::Synthesis, format!("read body: {e}")))?;
        if audio.is_empty() {
            return Err(SpeechError::transport(Stage::Synthesis, "empty audio"));
        }
        Ok(SynthesisResult { audio })
    }
}
