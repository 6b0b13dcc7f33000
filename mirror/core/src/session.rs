//! Per-session read caches
//!
//! A [`SessionCaches`] is created when a session starts and dropped when it
//! ends. It owns one [`ExpiringCache`] per cacheable read path and builds the
//! keys for each. Nothing here is process-global: two sessions never see
//! each other's entries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStats, ExpiringCache, SharedCache};
use crate::config::CacheSettings;

/// Namespace tag of the issue list cache
pub const ISSUES_NAMESPACE: &str = "issues";
/// Namespace tag of the pull request list cache
pub const PULLS_NAMESPACE: &str = "pulls";
/// Namespace tag of the commit timeline cache
pub const TIMELINE_NAMESPACE: &str = "timeline";
/// Namespace tag of the diff cache
pub const DIFF_NAMESPACE: &str = "diff";

/// Unique identifier for a client session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a file diff is rendered
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffView {
    /// One column with +/- lines
    #[default]
    Unified,
    /// Old and new side by side
    Split,
}

impl DiffView {
    /// Wire and key representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unified => "unified",
            Self::Split => "split",
        }
    }
}

impl std::fmt::Display for DiffView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The cache instances belonging to one session
#[derive(Clone, Debug)]
pub struct SessionCaches {
    session_id: SessionId,
    issues: SharedCache<Value>,
    pulls: SharedCache<Value>,
    timelines: SharedCache<Value>,
    diffs: SharedCache<Value>,
}

impl SessionCaches {
    /// Create empty caches for a session
    pub fn new(session_id: SessionId, settings: &CacheSettings) -> Self {
        tracing::debug!(session = %session_id, "creating session caches");
        Self {
            session_id,
            issues: ExpiringCache::shared(ISSUES_NAMESPACE, settings.issues),
            pulls: ExpiringCache::shared(PULLS_NAMESPACE, settings.pulls),
            timelines: ExpiringCache::shared(TIMELINE_NAMESPACE, settings.timeline),
            diffs: ExpiringCache::shared(DIFF_NAMESPACE, settings.diff),
        }
    }

    /// Session these caches belong to
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Issue list cache
    #[must_use]
    pub fn issues(&self) -> &SharedCache<Value> {
        &self.issues
    }

    /// Pull request list cache
    #[must_use]
    pub fn pulls(&self) -> &SharedCache<Value> {
        &self.pulls
    }

    /// Commit timeline cache
    #[must_use]
    pub fn timelines(&self) -> &SharedCache<Value> {
        &self.timelines
    }

    /// Diff cache
    #[must_use]
    pub fn diffs(&self) -> &SharedCache<Value> {
        &self.diffs
    }

    /// Key for an issue list of `repo` filtered by `state`
    #[must_use]
    pub fn issues_key(repo: &str, state: &str) -> CacheKey {
        CacheKey::new(ISSUES_NAMESPACE).part(repo).part(state)
    }

    /// Key for a pull request list of `repo` filtered by `state`
    #[must_use]
    pub fn pulls_key(repo: &str, state: &str) -> CacheKey {
        CacheKey::new(PULLS_NAMESPACE).part(repo).part(state)
    }

    /// Key for this session's commit timeline of `branch`
    #[must_use]
    pub fn timeline_key(&self, branch: &str) -> CacheKey {
        CacheKey::new(TIMELINE_NAMESPACE)
            .part(self.session_id.to_string())
            .part(branch)
    }

    /// Key for this session's diff of `path` at commit `sha`
    #[must_use]
    pub fn diff_key(&self, sha: &str, path: &str, view: DiffView) -> CacheKey {
        CacheKey::new(DIFF_NAMESPACE)
            .part(self.session_id.to_string())
            .part(sha)
            .part(path)
            .part(view.as_str())
    }

    /// Counters of every cache, keyed by namespace
    #[must_use]
    pub fn stats(&self) -> [(&'static str, CacheStats); 4] {
        [
            (ISSUES_NAMESPACE, self.issues.lock().stats()),
            (PULLS_NAMESPACE, self.pulls.lock().stats()),
            (TIMELINE_NAMESPACE, self.timelines.lock().stats()),
            (DIFF_NAMESPACE, self.diffs.lock().stats()),
        ]
    }

    /// Drop every cached entry of this session
    pub fn clear_all(&self) {
        self.issues.lock().clear();
        self.pulls.lock().clear();
        self.timelines.lock().clear();
        self.diffs.lock().clear();
        tracing::debug!(session = %self.session_id, "session caches cleared");
    }
}
