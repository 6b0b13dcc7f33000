//! Debounced single-flight fetches
//!
//! Rapid triggers (a user scrubbing through files in a diff view) collapse
//! into one request: each trigger restarts a quiescence timer, and only the
//! trigger that survives the full delay is issued. Issuing a request for a
//! key cancels whatever request for that key is still outstanding.
//!
//! Results are published on an unbounded channel returned by
//! [`Debouncer::new`]. A result whose operation was cancelled or superseded
//! is dropped without being published.
//!
//! Every task spawned here is a child of one root [`CancellationToken`], so
//! [`Debouncer::cancel_all`] (also run on drop) stops all of them at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, SharedCache};
use crate::error::Result;

/// A published result
#[derive(Debug)]
pub struct Fetched<V> {
    /// Key the result belongs to
    pub key: CacheKey,
    /// What the fetch produced
    pub result: Result<V>,
    /// Whether the value was served from the cache without a request
    pub from_cache: bool,
}

#[derive(Debug, Default)]
struct DebounceState {
    /// Bumped by every trigger; a timer only fires if it is still current
    generation: u64,
    pending_timer: Option<CancellationToken>,
    in_flight: HashMap<CacheKey, InFlight>,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

/// Trailing-edge debouncer with per-key single flight
pub struct Debouncer<V> {
    delay: Duration,
    cache: Option<SharedCache<V>>,
    results: mpsc::UnboundedSender<Fetched<V>>,
    state: Arc<Mutex<DebounceState>>,
    root: CancellationToken,
}

impl<V> Debouncer<V>
where
    V: Clone + Send + 'static,
{
    /// Create a debouncer and the receiver its results are published on
    ///
    /// With a cache, successful results are stored and triggers for a
    /// cached key are answered without a request.
    pub fn new(
        delay: Duration,
        cache: Option<SharedCache<V>>,
    ) -> (Self, mpsc::UnboundedReceiver<Fetched<V>>) {
        let (results, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            delay,
            cache,
            results,
            state: Arc::new(Mutex::new(DebounceState::default())),
            root: CancellationToken::new(),
        };
        (debouncer, rx)
    }

    /// Quiescence period
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Request `key`, to be fetched by `fetch` once triggers go quiet
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger<F, Fut>(&self, key: CacheKey, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if self.root.is_cancelled() {
            tracing::debug!(key = %key, "trigger after shutdown ignored");
            return;
        }

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            if let Some(timer) = state.pending_timer.take() {
                timer.cancel();
            }
            state.generation
        };

        let cached = self
            .cache
            .as_ref()
            .and_then(|cache| cache.lock().get(&key).cloned());
        if let Some(value) = cached {
            tracing::debug!(key = %key, "debounced trigger served from cache");
            let _ = self.results.send(Fetched {
                key,
                result: Ok(value),
                from_cache: true,
            });
            return;
        }

        let timer = self.root.child_token();
        self.state.lock().pending_timer = Some(timer.clone());

        let delay = self.delay;
        let state = Arc::clone(&self.state);
        let root = self.root.clone();
        let cache = self.cache.clone();
        let results = self.results.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let op = {
                let mut state = state.lock();
                if state.generation != generation {
                    return;
                }
                state.pending_timer = None;
                let op = root.child_token();
                let superseded = state.in_flight.insert(
                    key.clone(),
                    InFlight {
                        generation,
                        cancel: op.clone(),
                    },
                );
                if let Some(previous) = superseded {
                    tracing::debug!(key = %key, "cancelling superseded request");
                    previous.cancel.cancel();
                }
                op
            };

            tracing::debug!(key = %key, "issuing debounced request");
            let result = tokio::select! {
                biased;
                () = op.cancelled() => {
                    tracing::trace!(key = %key, "debounced request cancelled");
                    return;
                }
                result = fetch() => result,
            };

            {
                let mut state = state.lock();
                let current = state
                    .in_flight
                    .get(&key)
                    .is_some_and(|f| f.generation == generation);
                if !current || op.is_cancelled() {
                    return;
                }
                state.in_flight.remove(&key);
            }

            if result.as_ref().is_err_and(|e| e.is_cancelled()) {
                return;
            }
            if let (Some(cache), Ok(value)) = (cache.as_ref(), result.as_ref()) {
                cache.lock().set(key.clone(), value.clone());
            }
            let _ = results.send(Fetched {
                key,
                result,
                from_cache: false,
            });
        });
    }

    /// Cancel the pending timer and every in-flight request
    pub fn cancel_all(&self) {
        self.root.cancel();
        let mut state = self.state.lock();
        state.generation += 1;
        state.pending_timer = None;
        state.in_flight.clear();
    }

    /// Number of requests issued and not yet completed
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Whether a trigger is waiting for its quiescence timer
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending_timer.is_some()
    }
}

impl<V> Drop for Debouncer<V> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl<V> std::fmt::Debug for Debouncer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("cached", &self.cache.is_some())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
