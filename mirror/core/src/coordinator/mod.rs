//! Request Coordination
//!
//! The [`RequestCoordinator`] is the single front door a surface uses to
//! talk to the agent backend during one session. It owns the session's
//! caches and all background work, so tearing it down stops everything.
//!
//! # Modes
//!
//! - **Streaming turns** ([`turn`]): one live turn at a time; starting a new
//!   one cancels the previous.
//! - **Debounced reads** ([`debounce`]): diff requests triggered by rapid
//!   navigation collapse into one request per quiet period.
//! - **Cached reads**: issue lists, pull requests and timelines are served
//!   from the session caches, hitting the network only on a miss.
//! - **Status polling** ([`poll`]): fixed-interval checks of a long-running
//!   backend operation with a hard attempt ceiling.

pub mod debounce;
pub mod poll;
pub mod turn;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{AgentBackend, TurnRequest};
use crate::cache::{CacheKey, SharedCache};
use crate::config::{CoordinatorSettings, MirrorConfig};
use crate::error::Result;
use crate::session::{DiffView, SessionCaches, SessionId};

pub use debounce::{Debouncer, Fetched};
pub use poll::{
    NextAction, PollConfig, PollHandle, PollOutcome, StatusPoller, MIN_POLL_INTERVAL,
};
pub use turn::{TurnHandle, TurnStreamer, STREAM_ENDED_EARLY};

/// Backend path of issue lists
pub const ISSUES_PATH: &str = "issues";
/// Backend path of pull request lists
pub const PULLS_PATH: &str = "pulls";
/// Backend path of commit timelines
pub const TIMELINE_PATH: &str = "timeline";
/// Backend path of file diffs
pub const DIFF_PATH: &str = "diff";

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value>>>;

/// Session-scoped coordinator of every backend request
///
/// Dropping the coordinator, like [`RequestCoordinator::shutdown`], cancels
/// the status polls it started.
pub struct RequestCoordinator {
    backend: Arc<dyn AgentBackend>,
    settings: CoordinatorSettings,
    caches: SessionCaches,
    turns: TurnStreamer,
    diffs: Debouncer<Value>,
    /// Cached reads on the wire, joined by concurrent misses on the same key
    reads_in_flight: Mutex<HashMap<CacheKey, SharedFetch>>,
    /// Parent of every background poll's token
    root: CancellationToken,
}

impl RequestCoordinator {
    /// Create a coordinator for a new session
    ///
    /// Returns the receiver on which debounced diff results are published.
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        config: &MirrorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Fetched<Value>>) {
        Self::with_session(backend, config, SessionId::new())
    }

    /// Create a coordinator for a known session
    pub fn with_session(
        backend: Arc<dyn AgentBackend>,
        config: &MirrorConfig,
        session_id: SessionId,
    ) -> (Self, mpsc::UnboundedReceiver<Fetched<Value>>) {
        let caches = SessionCaches::new(session_id, &config.cache);
        let (diffs, diff_results) = Debouncer::new(
            config.coordinator.debounce,
            Some(Arc::clone(caches.diffs())),
        );
        tracing::info!(
            session = %session_id,
            backend = backend.name(),
            "session coordinator started"
        );
        let coordinator = Self {
            turns: TurnStreamer::new(Arc::clone(&backend)),
            backend,
            settings: config.coordinator,
            caches,
            diffs,
            reads_in_flight: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        };
        (coordinator, diff_results)
    }

    /// Session this coordinator serves
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.caches.session_id()
    }

    /// The session's caches
    #[must_use]
    pub fn caches(&self) -> &SessionCaches {
        &self.caches
    }

    /// Start a streaming turn, superseding any turn in flight
    pub fn start_turn(&self, request: TurnRequest) -> TurnHandle {
        self.turns.start(request)
    }

    /// Request the diff of `path` at `sha`, debounced
    ///
    /// The result arrives on the receiver returned by [`RequestCoordinator::new`].
    pub fn request_diff(&self, sha: &str, path: &str, view: DiffView) {
        let key = self.caches.diff_key(sha, path, view);
        let backend = Arc::clone(&self.backend);
        let session = self.session_id().to_string();
        let params = query(&[
            ("session_id", session.as_str()),
            ("sha", sha),
            ("path", path),
            ("view", view.as_str()),
        ]);
        self.diffs.trigger(key, move || async move {
            backend.fetch_json(DIFF_PATH, &params).await
        });
    }

    /// Issues of `repo` in `state`, from cache when fresh
    pub async fn fetch_issues(&self, repo: &str, state: &str) -> Result<Value> {
        let key = SessionCaches::issues_key(repo, state);
        let params = query(&[("repo", repo), ("state", state)]);
        self.fetch_cached(self.caches.issues(), key, ISSUES_PATH, &params)
            .await
    }

    /// Pull requests of `repo` in `state`, from cache when fresh
    pub async fn fetch_pull_requests(&self, repo: &str, state: &str) -> Result<Value> {
        let key = SessionCaches::pulls_key(repo, state);
        let params = query(&[("repo", repo), ("state", state)]);
        self.fetch_cached(self.caches.pulls(), key, PULLS_PATH, &params)
            .await
    }

    /// Commit timeline of `branch`, from cache when fresh
    pub async fn fetch_timeline(&self, branch: &str) -> Result<Value> {
        let key = self.caches.timeline_key(branch);
        let session = self.session_id().to_string();
        let params = query(&[
            ("session_id", session.as_str()),
            ("branch", branch),
        ]);
        self.fetch_cached(self.caches.timelines(), key, TIMELINE_PATH, &params)
            .await
    }

    /// Serve `key` from `cache`, or fetch `path` and populate the cache
    ///
    /// Concurrent misses on one key share a single request. Failed fetches
    /// are not cached.
    pub async fn fetch_cached(
        &self,
        cache: &SharedCache<Value>,
        key: CacheKey,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value> {
        let cached = cache.lock().get(&key).cloned();
        if let Some(value) = cached {
            tracing::debug!(key = %key, "cache hit");
            return Ok(value);
        }

        let fetch = {
            let mut in_flight = self.reads_in_flight.lock();
            if let Some(fetch) = in_flight.get(&key) {
                tracing::debug!(key = %key, "joining read in flight");
                fetch.clone()
            } else {
                tracing::debug!(key = %key, path, "cache miss, fetching");
                let fetch = self.read_through(cache, key.clone(), path, query);
                in_flight.insert(key.clone(), fetch.clone());
                fetch
            }
        };

        let result = fetch.clone().await;
        let mut in_flight = self.reads_in_flight.lock();
        if in_flight.get(&key).is_some_and(|current| current.ptr_eq(&fetch)) {
            in_flight.remove(&key);
        }
        result
    }

    fn read_through(
        &self,
        cache: &SharedCache<Value>,
        key: CacheKey,
        path: &str,
        query: &[(String, String)],
    ) -> SharedFetch {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(cache);
        let path = path.to_string();
        let query = query.to_vec();
        async move {
            let value = backend.fetch_json(&path, &query).await?;
            cache.lock().set(key, value.clone());
            Ok(value)
        }
        .boxed()
        .shared()
    }

    /// Poll the status of `target` in the background
    ///
    /// The loop stops at [`RequestCoordinator::shutdown`] even while its
    /// handle is alive.
    pub fn spawn_status_poll(&self, target: &str) -> PollHandle {
        let backend = Arc::clone(&self.backend);
        let target = target.to_string();
        StatusPoller::new(PollConfig::from(&self.settings)).spawn_with_token(
            self.root.child_token(),
            move || {
                let backend = Arc::clone(&backend);
                let target = target.clone();
                async move { backend.check_status(&target).await }
            },
        )
    }

    /// Cancel all background work and drop every cached entry
    pub fn shutdown(&self) {
        self.root.cancel();
        self.turns.cancel_current();
        self.diffs.cancel_all();
        self.reads_in_flight.lock().clear();
        self.caches.clear_all();
        tracing::info!(session = %self.session_id(), "session coordinator shut down");
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("session", &self.session_id())
            .field("backend", &self.backend.name())
            .field("reads_in_flight", &self.reads_in_flight.lock().len())
            .field("shut_down", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}
