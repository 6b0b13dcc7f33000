//! Status polling
//!
//! Checks the status of a long-running backend operation (repository
//! indexing, for example) on a fixed interval until it reaches a terminal
//! state. The first check happens immediately.
//!
//! The loop ends in exactly one of five ways, and each one stays
//! distinguishable so a surface can pick the right reaction:
//!
//! | Outcome         | Cause                                   | Next action |
//! |-----------------|-----------------------------------------|-------------|
//! | `Ready`         | terminal-success status                 | none        |
//! | `ServerFailed`  | terminal-failure status                 | report      |
//! | `PollingFailed` | transport error on a check (no retry)   | retry       |
//! | `Timeout`       | attempt ceiling reached                 | wait        |
//! | `Cancelled`     | token cancelled, in flight or idle      | none        |

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorSettings;
use crate::error::{MirrorError, Result};
use crate::protocol::{StatusPhase, StatusReport};

/// Shortest interval a poller will tick at
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Interval and ceiling of one polling loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between the starts of consecutive checks
    pub interval: Duration,
    /// Maximum number of checks
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(&CoordinatorSettings::default())
    }
}

impl From<&CoordinatorSettings> for PollConfig {
    fn from(settings: &CoordinatorSettings) -> Self {
        Self {
            interval: settings.poll_interval,
            max_attempts: settings.max_poll_attempts,
        }
    }
}

/// What a surface should offer after polling stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextAction {
    /// Offer to poll again
    Retry,
    /// Tell the user the operation is still running
    Wait,
    /// Show the server's failure
    Report,
    /// Nothing to do
    None,
}

/// How a polling loop ended
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// The operation finished successfully
    Ready(StatusReport),
    /// The server reported that the operation failed
    ServerFailed {
        /// Failure description from the report
        message: String,
        /// The terminal report
        report: StatusReport,
    },
    /// A status check itself failed
    PollingFailed {
        /// The transport or decode error
        error: MirrorError,
        /// Checks made, including the failed one
        attempts: u32,
    },
    /// The attempt ceiling was reached without a terminal state
    Timeout {
        /// Checks made
        attempts: u32,
    },
    /// The loop was cancelled
    Cancelled {
        /// Checks started before cancellation
        attempts: u32,
    },
}

impl PollOutcome {
    /// Whether the operation is known to have succeeded
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Suggested follow-up for the surface
    #[must_use]
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::Ready(_) | Self::Cancelled { .. } => NextAction::None,
            Self::ServerFailed { .. } => NextAction::Report,
            Self::PollingFailed { .. } => NextAction::Retry,
            Self::Timeout { .. } => NextAction::Wait,
        }
    }

    /// One-line description for a user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Ready(report) => report
                .message
                .clone()
                .unwrap_or_else(|| "Ready.".to_string()),
            Self::ServerFailed { message, .. } => format!("The operation failed: {message}"),
            Self::PollingFailed { error, .. } => {
                format!("Could not check the status ({error}). Try again.")
            }
            Self::Timeout { .. } => {
                "This is taking longer than expected. It is still running in the background."
                    .to_string()
            }
            Self::Cancelled { .. } => "Stopped checking the status.".to_string(),
        }
    }
}

/// Polls one operation until it settles
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusPoller {
    config: PollConfig,
}

impl StatusPoller {
    /// Create a poller
    ///
    /// An interval below [`MIN_POLL_INTERVAL`] is raised to it.
    #[must_use]
    pub fn new(mut config: PollConfig) -> Self {
        config.interval = config.interval.max(MIN_POLL_INTERVAL);
        Self { config }
    }

    /// Interval and ceiling in use
    #[must_use]
    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Run the loop to completion
    ///
    /// Non-terminal reports are published on `progress` when given.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut check: F,
        progress: Option<&watch::Sender<Option<StatusReport>>>,
    ) -> PollOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<StatusReport>>,
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return PollOutcome::Cancelled { attempts },
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return PollOutcome::Cancelled { attempts },
                result = check() => result,
            };

            let report = match result {
                Ok(report) => report,
                Err(MirrorError::Cancelled) => return PollOutcome::Cancelled { attempts },
                Err(error) => {
                    tracing::warn!(attempts, error = %error, "status check failed");
                    return PollOutcome::PollingFailed { error, attempts };
                }
            };

            match report.phase() {
                StatusPhase::Ready => {
                    tracing::info!(attempts, status = %report.status, "operation ready");
                    return PollOutcome::Ready(report);
                }
                StatusPhase::Failed => {
                    let message = report.failure_message();
                    tracing::info!(attempts, error = %message, "operation failed");
                    return PollOutcome::ServerFailed { message, report };
                }
                StatusPhase::InProgress => {
                    tracing::debug!(attempts, status = %report.status, "operation in progress");
                    if let Some(progress) = progress {
                        progress.send_replace(Some(report));
                    }
                    if attempts >= self.config.max_attempts {
                        tracing::warn!(attempts, "status polling gave up");
                        return PollOutcome::Timeout { attempts };
                    }
                }
            }
        }
    }

    /// Run the loop on a background task
    pub fn spawn<F, Fut>(self, check: F) -> PollHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<StatusReport>> + Send + 'static,
    {
        self.spawn_with_token(CancellationToken::new(), check)
    }

    /// Run the loop on a background task that also stops when `cancel` does
    ///
    /// Pass a child of an owner's token to tie the loop to that owner.
    pub fn spawn_with_token<F, Fut>(self, cancel: CancellationToken, check: F) -> PollHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<StatusReport>> + Send + 'static,
    {
        let (tx, progress) = watch::channel(None);
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(&token, check, Some(&tx)).await });
        PollHandle {
            cancel,
            progress,
            task: Some(task),
        }
    }
}

/// A polling loop running in the background
///
/// Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    progress: watch::Receiver<Option<StatusReport>>,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    /// Stop polling
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest non-terminal report
    #[must_use]
    pub fn latest(&self) -> Option<StatusReport> {
        self.progress.borrow().clone()
    }

    /// Receiver of non-terminal reports
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Option<StatusReport>> {
        self.progress.clone()
    }

    /// Wait for the loop to end
    pub async fn outcome(mut self) -> PollOutcome {
        let Some(task) = self.task.take() else {
            return PollOutcome::Cancelled { attempts: 0 };
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => PollOutcome::Cancelled { attempts: 0 },
            Err(e) => PollOutcome::PollingFailed {
                error: MirrorError::transport(format!("status poller stopped: {e}")),
                attempts: 0,
            },
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
