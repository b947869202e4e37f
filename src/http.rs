//! Shared plumbing for the HTTP service clients.

use crate::error::{SpeechError, Stage};
use crate::pipeline::messages::TurnId;

/// Header carrying the turn id on every service request.
pub(crate) const TURN_ID_HEADER: &str = "X-Turn-Id";

/// One configured service endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) client: reqwest::Client,
    pub(crate) url: String,
    api_key: String,
    pub(crate) stage: Stage,
}

impl Endpoint {
    pub(crate) fn new(stage: Stage, url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_owned(),
            api_key: api_key.to_owned(),
            stage,
        }
    }

    /// Start a POST to the endpoint with auth and turn id attached.
    pub(crate) fn post(&self, turn_id: TurnId) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(&self.url)
            .header(TURN_ID_HEADER, turn_id.get());
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    /// Send a request and return the successful response, mapping transport
    /// failures and non-2xx statuses to [`SpeechError::Transport`].
    pub(crate) async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SpeechError> {
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::transport(self.stage, format!("request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_http_error(self.stage, status, &body))
    }
}

/// Map an HTTP error status to a transport error.
pub(crate) fn map_http_error(stage: Stage, status: reqwest::StatusCode, body: &str) -> SpeechError {
    let detail = extract_error_message(body);
    let message = match status.as_u16() {
        401 | 403 => format!("authentication failed: {detail}"),
        429 => format!("rate limit exceeded: {detail}"),
        _ => format!("HTTP {}: {detail}", status.as_u16()),
    };
    SpeechError::transport(stage, message)
}

/// Extract a human-readable message from an error response body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and
/// `{"detail": ".."}`; otherwise returns the (truncated) body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| {
            if body.is_empty() {
                "no response body".to_owned()
            } else {
                body.chars().take(500).collect()
            }
        })
}
