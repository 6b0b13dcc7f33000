//! Agent Backend Integration
//!
//! Abstracted access to the agent service through a common trait interface.
//!
//! # Usage
//!
//! ```ignore
//! use mirror_core::backend::{AgentBackend, HttpBackend, TurnRequest};
//! use mirror_core::config::BackendSettings;
//!
//! let backend = HttpBackend::new(&BackendSettings::default())?;
//! let chunks = backend.stream_turn(&TurnRequest::new("Hello!")).await?;
//! ```

mod http;
mod traits;

pub use http::HttpBackend;
pub use traits::{AgentBackend, TurnRequest};
