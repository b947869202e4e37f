//! Reply generation through an external service.
//!
//! Request: JSON `{"text", "mode", "turn_id"}`. Response: JSON
//! `{"text", "audio_base64"?, "structured_extract"?}`. When audio comes back
//! it is played as-is; otherwise the text is split at pause markers and
//! synthesized piece by piece.

use crate::config::ServiceConfig;
use crate::error::{Result, SpeechError, Stage};
use crate::http::Endpoint;
use crate::pipeline::messages::TurnId;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A generated reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyResult {
    /// Reply text, possibly containing pause markers.
    pub text: String,
    /// Pre-rendered audio for the whole reply, if the service made it.
    pub audio: Option<Bytes>,
    /// Opaque structured data extracted from the exchange.
    pub structured_extract: Option<serde_json::Value>,
}

/// Request/response reply collaborator.
#[async_trait]
pub trait ReplyClient: Send + Sync {
    /// Generate a reply to the user's `text` for `turn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Transport`] when the service cannot be reached
    /// or answers with an error.
    async fn generate(
        &self,
        text: &str,
        mode: Option<&str>,
        turn_id: TurnId,
    ) -> Result<ReplyResult>;
}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<&'a str>,
    turn_id: u64,
}

#[derive(Deserialize)]
struct ReplyResponse {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "audioBase64")]
    audio_base64: Option<String>,
    #[serde(default, alias = "structuredExtract")]
    structured_extract: Option<serde_json::Value>,
}

impl ReplyResponse {
    fn into_result(self) -> Result<ReplyResult> {
        let audio = match self.audio_base64.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(encoded) => Some(Bytes::from(STANDARD.decode(encoded).map_err(|e| {
                SpeechError::transport(Stage::Reply, format!("invalid audio_base64: {e}"))
            })?)),
        };
        Ok(ReplyResult {
            text: self.text,
            audio,
            structured_extract: self.structured_extract.filter(|v| !v.is_null()),
        })
    }
}

/// [`ReplyClient`] backed by an HTTP endpoint.
pub struct HttpReplyClient {
    endpoint: Endpoint,
}

impl HttpReplyClient {
    /// Create a client for `services.reply_url`.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            endpoint: Endpoint::new(Stage::Reply, &config.reply_url, &config.api_key),
        }
    }
}

#[async_trait]
impl ReplyClient for HttpReplyClient {
    async fn generate(
        &self,
        text: &str,
        mode: Option<&str>,
        turn_id: TurnId,
    ) -> Result<ReplyResult> {
        debug!("turn {turn_id}: requesting reply");
        let request = self.endpoint.post(turn_id).json(&ReplyRequest {
            text,
            mode,
            turn_id: turn_id.get(),
        });
        let response = self.endpoint.send(request).await?;
        let body: ReplyResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::transport(Stage::Reply, format!("invalid response: {e}")))?;
        body.into_result()
    }
}
