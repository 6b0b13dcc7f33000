//! TOML Configuration File Support
//!
//! Centralized configuration loading for the client core, backed by an
//! optional TOML file at `~/.config/agent-mirror/mirror.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000/api"
//! stream_path = "chat/stream"
//! status_path = "status"
//! connect_timeout_ms = 5000
//! request_timeout_ms = 30000
//!
//! [coordinator]
//! debounce_ms = 200
//! poll_interval_ms = 2000
//! max_poll_attempts = 150
//!
//! [cache.issues]
//! ttl_secs = 300
//! max_entries = 50
//!
//! [cache.diff]
//! ttl_secs = 600
//! max_entries = 200
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// How to reach the agent backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSettings {
    /// Base URL all paths are joined onto
    pub base_url: String,
    /// Path of the streaming turn endpoint
    pub stream_path: String,
    /// Path prefix of the status polling endpoint
    pub status_path: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout for non-streaming reads
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            stream_path: "chat/stream".to_string(),
            status_path: "status".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Timing of debounced fetches and status polling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Quiescence period before a debounced fetch is issued
    pub debounce: Duration,
    /// Interval between status checks
    pub poll_interval: Duration,
    /// Hard ceiling on status checks
    pub max_poll_attempts: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 150,
        }
    }
}

/// Bounds of every per-session read cache
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    /// Issue lists
    pub issues: CacheConfig,
    /// Pull request lists
    pub pulls: CacheConfig,
    /// Commit timelines
    pub timeline: CacheConfig,
    /// Per-commit file diffs
    pub diff: CacheConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            issues: CacheConfig::new(Duration::from_secs(300), 50),
            pulls: CacheConfig::new(Duration::from_secs(300), 50),
            timeline: CacheConfig::new(Duration::from_secs(120), 20),
            diff: CacheConfig::new(Duration::from_secs(600), 200),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Base URL of the backend
    pub base_url: Option<String>,

    /// Streaming endpoint path
    pub stream_path: Option<String>,

    /// Status endpoint path prefix
    pub status_path: Option<String>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// Coordinator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorToml {
    /// Debounce delay in milliseconds
    pub debounce_ms: Option<u64>,

    /// Poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Maximum number of status checks
    pub max_poll_attempts: Option<u32>,
}

/// Bounds of one cache namespace in the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNamespaceToml {
    /// Entry time-to-live in seconds
    pub ttl_secs: Option<u64>,

    /// Maximum number of keys
    pub max_entries: Option<usize>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Issue list cache
    pub issues: CacheNamespaceToml,

    /// Pull request cache
    pub pulls: CacheNamespaceToml,

    /// Commit timeline cache
    pub timeline: CacheNamespaceToml,

    /// Diff cache
    pub diff: CacheNamespaceToml,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorToml {
    /// Backend section
    pub backend: BackendToml,

    /// Coordinator section
    pub coordinator: CoordinatorToml,

    /// Cache section
    pub cache: CacheToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the client core
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Backend connection settings
    pub backend: BackendSettings,

    /// Debounce and polling settings
    pub coordinator: CoordinatorSettings,

    /// Per-session cache bounds
    pub cache: CacheSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            coordinator: CoordinatorSettings::default(),
            cache: CacheSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl MirrorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the coordinator misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for empty URLs, zero
    /// intervals, a zero attempt ceiling or a zero cache capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.base_url must not be empty".to_string(),
            ));
        }
        if self.coordinator.debounce.is_zero() {
            return Err(ConfigError::ValidationError(
                "coordinator.debounce_ms must be greater than zero".to_string(),
            ));
        }
        if self.coordinator.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "coordinator.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.coordinator.max_poll_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "coordinator.max_poll_attempts must be greater than zero".to_string(),
            ));
        }
        for (name, cache) in [
            ("issues", self.cache.issues),
            ("pulls", self.cache.pulls),
            ("timeline", self.cache.timeline),
            ("diff", self.cache.diff),
        ] {
            if cache.max_entries == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "cache.{name}.max_entries must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/agent-mirror/mirror.toml` or
/// `~/.config/agent-mirror/mirror.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agent-mirror").join("mirror.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values fail validation. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<MirrorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<MirrorConfig, ConfigError> {
    let mut config = MirrorConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: MirrorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

fn apply_cache_toml(target: &mut CacheConfig, toml: &CacheNamespaceToml) {
    if let Some(ttl) = toml.ttl_secs {
        target.ttl = Duration::from_secs(ttl);
    }
    if let Some(max) = toml.max_entries {
        target.max_entries = max;
    }
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut MirrorConfig, toml: &MirrorToml) {
    // Backend settings
    if let Some(ref url) = toml.backend.base_url {
        config.backend.base_url.clone_from(url);
    }
    if let Some(ref path) = toml.backend.stream_path {
        config.backend.stream_path.clone_from(path);
    }
    if let Some(ref path) = toml.backend.status_path {
        config.backend.status_path.clone_from(path);
    }
    if let Some(ms) = toml.backend.connect_timeout_ms {
        config.backend.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.backend.request_timeout_ms {
        config.backend.request_timeout = Duration::from_millis(ms);
    }

    // Coordinator settings
    if let Some(ms) = toml.coordinator.debounce_ms {
        config.coordinator.debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.coordinator.poll_interval_ms {
        config.coordinator.poll_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = toml.coordinator.max_poll_attempts {
        config.coordinator.max_poll_attempts = attempts;
    }

    // Cache settings
    apply_cache_toml(&mut config.cache.issues, &toml.cache.issues);
    apply_cache_toml(&mut config.cache.pulls, &toml.cache.pulls);
    apply_cache_toml(&mut config.cache.timeline, &toml.cache.timeline);
    apply_cache_toml(&mut config.cache.diff, &toml.cache.diff);
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut MirrorConfig) {
    if let Ok(url) = std::env::var("MIRROR_BASE_URL") {
        if !url.trim().is_empty() {
            config.backend.base_url = url;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(timeout) = std::env::var("MIRROR_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.backend.request_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(debounce) = std::env::var("MIRROR_DEBOUNCE_MS") {
        if let Ok(ms) = debounce.parse::<u64>() {
            config.coordinator.debounce = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(interval) = std::env::var("MIRROR_POLL_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.coordinator.poll_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(attempts) = std::env::var("MIRROR_MAX_POLL_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.coordinator.max_poll_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Backend base URL override
    pub base_url: Option<String>,

    /// Debounce delay override (milliseconds)
    pub debounce_ms: Option<u64>,

    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,

    /// Poll attempt ceiling override
    pub max_poll_attempts: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set debounce override
    #[must_use]
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = Some(ms);
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Set poll attempt ceiling override
    #[must_use]
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = Some(attempts);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.debounce_ms.is_none()
            && self.poll_interval_ms.is_none()
            && self.max_poll_attempts.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override produces an
    /// invalid configuration.
    pub fn apply(&self, config: &mut MirrorConfig) -> Result<(), ConfigError> {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.backend.base_url.clone_from(url);
        }
        if let Some(ms) = self.debounce_ms {
            config.coordinator.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.coordinator.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_poll_attempts {
            config.coordinator.max_poll_attempts = attempts;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
