//! HTTP Backend Implementation
//!
//! [`AgentBackend`] over reqwest.
//!
//! # Endpoints
//!
//! - `POST <base>/<stream_path>` - streaming turn, answered with SSE frames
//! - `GET <base>/<status_path>/<target>` - status of a long-running operation;
//!   `target` is always one percent-encoded path segment
//! - `GET <base>/<path>` - JSON reads (issues, pulls, timelines, diffs)
//!
//! The connect timeout applies to every request. The request timeout applies
//! only to non-streaming requests, since a turn may legitimately stream for
//! longer than any fixed bound.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use super::traits::{AgentBackend, TurnRequest};
use crate::config::BackendSettings;
use crate::decoder::ChunkStream;
use crate::error::{MirrorError, Result};
use crate::protocol::StatusReport;

/// HTTP client for the agent service
#[derive(Clone, Debug)]
pub struct HttpBackend {
    settings: BackendSettings,
    http_client: reqwest::Client,
}

impl HttpBackend {
    /// Create a backend from resolved settings
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Transport`] if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| MirrorError::transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            settings: settings.clone(),
            http_client,
        })
    }

    /// Settings this backend was built from
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Join a path onto the base URL with exactly one slash between them
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn status_url(&self, target: &str) -> Result<reqwest::Url> {
        let base = self.url(self.settings.status_path.trim_matches('/'));
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| MirrorError::transport(format!("invalid status URL `{base}`: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MirrorError::transport(format!("status URL `{base}` cannot take a path")))?
            .pop_if_empty()
            .push(target);
        Ok(url)
    }
}

/// Turn a non-2xx response into a transport error carrying the body text
async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    Err(MirrorError::Transport {
        status: Some(status.as_u16()),
        message,
    })
}

#[async_trait]
impl AgentBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn stream_turn(&self, request: &TurnRequest) -> Result<ChunkStream> {
        let url = self.url(&self.settings.stream_path);
        tracing::debug!(url = %url, "opening turn stream");

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_response(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(MirrorError::from))
            .boxed())
    }

    async fn check_status(&self, target: &str) -> Result<StatusReport> {
        let url = self.status_url(target)?;
        tracing::trace!(url = %url, "checking status");

        let response = self
            .http_client
            .get(url)
            .timeout(self.settings.request_timeout)
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.json::<StatusReport>().await?)
    }

    async fn fetch_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(url = %url, params = query.len(), "fetching");

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .timeout(self.settings.request_timeout)
            .send()
            .await?;
        let response = check_response(response).await?;
        Ok(response.json::<Value>().await?)
    }
}
