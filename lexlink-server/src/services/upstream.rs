//! Client for the upstream inference service.
//!
//! The upstream speaks the same SSE frame vocabulary the relay emits, so the
//! relay is a pass-through proxy over it. Every failure here is degradable:
//! the relay pattern-matches the returned `Result` into either a
//! pass-through task or the local fallback generator.

use http::StatusCode;
use serde_json::{Value, json};
use shared::config::server::UpstreamConfig;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {status} from {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: std::time::Duration,
}

impl UpstreamClient {
    /// Builds a client from configuration. The connect timeout applies to
    /// every request; the total request timeout only to the one-shot send,
    /// so an open token stream is never cut off mid-generation.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Forwards a user message to the upstream. Returns the upstream-issued
    /// message id when the response carries one.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        message: &str,
    ) -> Result<Option<Uuid>, UpstreamError> {
        let url = format!("{}/conversations/{conversation_id}/messages", self.base_url);
        debug!(%url, "forwarding message to upstream");

        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&json!({ "message": message }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { url, status, body });
        }

        let value: Value = response.json().await?;
        Ok(value
            .get("message_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok()))
    }

    /// Opens the upstream token stream for a conversation. The caller owns
    /// the response body and drives the byte stream.
    pub async fn open_stream(
        &self,
        conversation_id: Uuid,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = format!(
            "{}/conversations/{conversation_id}/messages/stream",
            self.base_url
        );
        debug!(%url, "opening upstream stream");

        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { url, status, body });
        }

        Ok(response)
    }
}
