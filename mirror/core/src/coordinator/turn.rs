//! Streaming turns
//!
//! A turn is driven on its own task: open the stream through the backend,
//! decode it, fold every event into the [`Turn`] and publish each changed
//! snapshot on a watch channel. Surfaces read snapshots; they never touch
//! the stream.
//!
//! Starting a turn supersedes (cancels) the one before it. A cancelled turn
//! stops reducing, releases its stream and ends in `Cancelled` without an
//! error.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{AgentBackend, TurnRequest};
use crate::decoder::decode;
use crate::protocol::ProtocolEvent;
use crate::transcript::{Turn, TurnId};

/// Folded into a turn whose stream closed before a terminal frame
pub const STREAM_ENDED_EARLY: &str = "response stream ended before completion";

/// Starts turns and keeps track of the current one
pub struct TurnStreamer {
    backend: Arc<dyn AgentBackend>,
    current: Mutex<Option<CancellationToken>>,
}

impl TurnStreamer {
    /// Create a streamer over a backend
    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
        }
    }

    /// Start a turn, cancelling any turn still in flight
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: TurnRequest) -> TurnHandle {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(cancel.clone()) {
            if !previous.is_cancelled() {
                tracing::debug!("superseding in-flight turn");
            }
            previous.cancel();
        }

        let turn = Turn::new(request.message.clone());
        let id = turn.id();
        let (tx, updates) = watch::channel(turn.clone());
        let backend = Arc::clone(&self.backend);
        let task = tokio::spawn(drive(backend, request, turn, tx, cancel.clone()));

        TurnHandle {
            id,
            updates,
            cancel,
            task: Some(task),
        }
    }

    /// Cancel the current turn, if any
    pub fn cancel_current(&self) {
        if let Some(current) = self.current.lock().take() {
            current.cancel();
        }
    }
}

impl std::fmt::Debug for TurnStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStreamer")
            .field("backend", &self.backend.name())
            .field("active", &self.current.lock().is_some())
            .finish()
    }
}

fn publish(tx: &watch::Sender<Turn>, turn: &Turn) {
    tx.send_replace(turn.clone());
}

fn finish_cancelled(mut turn: Turn, tx: &watch::Sender<Turn>) -> Turn {
    if turn.cancel() {
        tracing::info!(turn = %turn.id(), "turn cancelled");
        publish(tx, &turn);
    }
    turn
}

async fn drive(
    backend: Arc<dyn AgentBackend>,
    request: TurnRequest,
    mut turn: Turn,
    tx: watch::Sender<Turn>,
    cancel: CancellationToken,
) -> Turn {
    tracing::info!(turn = %turn.id(), backend = backend.name(), "turn started");

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        opened = backend.stream_turn(&request) => Some(opened),
    };
    let chunks = match opened {
        None => return finish_cancelled(turn, &tx),
        Some(Ok(chunks)) => chunks,
        Some(Err(error)) => {
            tracing::warn!(turn = %turn.id(), error = %error, "failed to open turn stream");
            turn.apply(&ProtocolEvent::fatal(error.to_string()));
            publish(&tx, &turn);
            return turn;
        }
    };

    let mut events = decode(chunks);
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                events.cancel();
                return finish_cancelled(turn, &tx);
            }
            next = events.next() => next,
        };

        match next {
            Some(event) => {
                tracing::debug!(turn = %turn.id(), terminal = event.is_terminal(), "event received");
                if turn.apply(&event) {
                    publish(&tx, &turn);
                }
                if turn.is_terminal() {
                    break;
                }
            }
            None => {
                if !turn.is_terminal() {
                    tracing::warn!(turn = %turn.id(), "stream closed without a terminal frame");
                    turn.apply(&ProtocolEvent::fatal(STREAM_ENDED_EARLY));
                    publish(&tx, &turn);
                }
                break;
            }
        }
    }

    tracing::info!(turn = %turn.id(), state = ?turn.state(), steps = turn.transcript().len(), "turn finished");
    turn
}

/// A turn running in the background
///
/// Dropping the handle cancels the turn.
#[derive(Debug)]
pub struct TurnHandle {
    id: TurnId,
    updates: watch::Receiver<Turn>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Turn>>,
}

impl TurnHandle {
    /// Identifier of the turn
    #[must_use]
    pub fn id(&self) -> TurnId {
        self.id
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> Turn {
        self.updates.borrow().clone()
    }

    /// A receiver of every published snapshot
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Turn> {
        self.updates.clone()
    }

    /// Wait for the next snapshot
    ///
    /// Returns `None` once the turn has finished and its last snapshot has
    /// been seen.
    pub async fn changed(&mut self) -> Option<Turn> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }

    /// Cancel the turn
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the turn to end and return its final state
    pub async fn wait(mut self) -> Turn {
        let Some(task) = self.task.take() else {
            return self.snapshot();
        };
        match task.await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!(turn = %self.id, error = %e, "turn task ended abnormally");
                let mut turn = self.snapshot();
                turn.cancel();
                turn
            }
        }
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
