//! Error Taxonomy
//!
//! Every failure the client core can observe falls into one of five buckets.
//! Streaming failures never travel up the call stack as `Err`: they are
//! folded into the Turn as a terminal `Error` event. `Cancelled` is not a
//! failure at all and is swallowed by the coordinator.

use thiserror::Error;

/// Errors produced by the client core
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
    /// Network or HTTP failure talking to the backend
    #[error("transport error: {message}")]
    Transport {
        /// HTTP status code, when the server answered at all
        status: Option<u16>,
        /// Human-readable failure description
        message: String,
    },

    /// A frame or response body could not be decoded
    #[error("malformed frame: {0}")]
    Decode(String),

    /// The backend explicitly reported a failure
    #[error("{0}")]
    ServerReported(String),

    /// An attempt budget was exhausted without a terminal answer
    #[error("gave up after {attempts} attempts")]
    Timeout {
        /// Number of attempts made
        attempts: u32,
    },

    /// The operation was superseded or aborted
    #[error("operation was cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Build a transport error without an HTTP status
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Whether this is a cancellation rather than a real failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status attached to a transport error, if any
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::Decode(error.to_string());
        }
        Self::Transport {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Result alias used throughout the core
pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_and_status() {
        let err = MirrorError::Transport {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "transport error: bad gateway");
        assert_eq!(err.status(), Some(502));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(MirrorError::Cancelled.is_cancelled());
        assert_eq!(MirrorError::Cancelled.status(), None);
    }

    #[test]
    fn test_json_error_becomes_decode() {
        let err: MirrorError = serde_json::from_str::<serde_json::Value>("{nope")
            .unwrap_err()
            .into();
        assert!(matches!(err, MirrorError::Decode(_)));
    }
}
