//! Agent Backend Traits
//!
//! The coordinator talks to the agent service only through [`AgentBackend`].
//! The HTTP client is one implementation; tests plug in scripted ones.
//!
//! # Design Philosophy
//!
//! The trait exposes the three kinds of traffic the client generates:
//! - Opening a streaming turn (raw chunks, decoded by the caller)
//! - Checking the status of a long-running operation
//! - Plain JSON reads that the session caches hold on to
//!
//! Implementations handle transport details (URLs, headers, timeouts).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::decoder::ChunkStream;
use crate::error::Result;
use crate::protocol::StatusReport;

/// Body of a streaming turn request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    /// The user prompt
    pub message: String,
    /// Backend session the turn belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Repository the conversation is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Opaque context forwarded to the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl TurnRequest {
    /// Create a request for a prompt
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Set the session identifier
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set the repository
    #[must_use]
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Set the context payload
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Agent backend trait
///
/// Implement this trait to connect the coordinator to a different transport.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Get the backend name (e.g., "http")
    fn name(&self) -> &str;

    /// Open a streaming turn
    ///
    /// Returns the raw response body as a chunk stream. Dropping the stream
    /// aborts the underlying request.
    async fn stream_turn(&self, request: &TurnRequest) -> Result<ChunkStream>;

    /// Fetch the current status of a long-running operation
    async fn check_status(&self, target: &str) -> Result<StatusReport>;

    /// Perform a JSON read
    async fn fetch_json(&self, path: &str, query: &[(String, String)]) -> Result<Value>;
}

impl std::fmt::Debug for dyn AgentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AgentBackend({})", self.name())
    }
}
