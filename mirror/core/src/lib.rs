//! Mirror Core - Headless Client Core for agent-mirror
//!
//! This crate turns the streamed output of a remote AI agent into live,
//! incrementally updated application state, and keeps the chatter between a
//! surface and the backend in check. It has no UI dependency and can drive a
//! terminal, a web view or a headless test.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          UI Surfaces                             │
//! │        reads Turn snapshots, StatusReport progress, Fetched     │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                         MIRROR CORE                              │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                   RequestCoordinator                        │  │
//! │  │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌───────┐ │  │
//! │  │  │   Turns    │  │ Debounced  │  │   Status   │  │Session│ │  │
//! │  │  │ (stream)   │  │   reads    │  │  polling   │  │caches │ │  │
//! │  │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘  └───────┘ │  │
//! │  └────────┼───────────────┼───────────────┼───────────────────┘  │
//! │     decoder ──▶ transcript│               │                      │
//! │           ▲               │               │                      │
//! │  ┌────────┴───────────────┴───────────────┴───────────────────┐  │
//! │  │                AgentBackend (HTTP / SSE)                    │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`RequestCoordinator`]: per-session front door for every request
//! - [`ProtocolEvent`]: one decoded frame of a streaming turn
//! - [`Turn`]: one request/response cycle and its [`Transcript`]
//! - [`ExpiringCache`]: TTL- and size-bounded cache, one per namespace
//! - [`AgentBackend`]: transport seam, implemented by [`HttpBackend`]
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mirror_core::{load_config, HttpBackend, RequestCoordinator, TurnRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let backend = Arc::new(HttpBackend::new(&config.backend)?);
//!     let (coordinator, _diffs) = RequestCoordinator::new(backend, &config);
//!
//!     let mut turn = coordinator.start_turn(TurnRequest::new("What changed?"));
//!     while let Some(snapshot) = turn.changed().await {
//!         println!("{}", snapshot.visible_content());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`protocol`]: wire event model and status reports
//! - [`decoder`]: SSE bytes to [`ProtocolEvent`]s
//! - [`transcript`]: pure reducer from events to [`Turn`] state
//! - [`coordinator`]: debouncing, single flight, polling and turn streaming
//! - [`cache`]: expiring, bounded, namespaced cache
//! - [`session`]: the per-session cache set and its key builders
//! - [`backend`]: backend trait and HTTP implementation
//! - [`config`]: TOML/env/CLI configuration
//! - [`error`]: error taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transcript;

// Re-exports for convenience
pub use backend::{AgentBackend, HttpBackend, TurnRequest};
pub use cache::{CacheConfig, CacheKey, CacheStats, ExpiringCache, SharedCache};
pub use coordinator::{
    Debouncer, Fetched, NextAction, PollConfig, PollHandle, PollOutcome, RequestCoordinator,
    StatusPoller, TurnHandle, TurnStreamer,
};
pub use decoder::{decode, ChunkStream, EventStream, FrameDecoder};
pub use error::{MirrorError, Result};
pub use protocol::{
    Progress, ProtocolEvent, StatusPhase, StatusReport, Step, StepKind, ToolMetadata,
};
pub use session::{DiffView, SessionCaches, SessionId};
pub use transcript::{reduce, reduce_all, Transcript, Turn, TurnId, TurnState};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendSettings, CacheSettings,
    ConfigError, ConfigOverrides, ConfigSource, CoordinatorSettings, MirrorConfig,
};
