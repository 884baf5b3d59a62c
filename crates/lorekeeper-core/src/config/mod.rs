//! Runtime configuration for the persistence and sync layer.
//!
//! A single `StoreConfig` is built at application start and injected into the
//! managers; there are no module-level singletons.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::normalize_text_option;

/// Storage tier selector for the persistence manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageChoice {
    /// Structured SQLite-backed store
    #[default]
    Structured,
    /// Plain key-value fallback store
    KeyValue,
}

/// Conflict resolution strategy applied after each sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Local data wins unconditionally
    Client,
    /// Remote data wins unconditionally
    Server,
    /// Whichever side carries the later timestamp wins
    #[default]
    Timestamp,
    /// Conflicts wait for an explicit `resolve_conflict` call
    Manual,
}

/// Remote sync endpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEndpointConfig {
    /// Base URL, e.g. `https://api.example.com/v1/sync`
    pub url: Option<String>,
    /// Bearer token sent with every request when present
    pub auth_token: Option<String>,
}

impl SyncEndpointConfig {
    /// Create an endpoint configuration from a URL and token.
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
        }
    }

    /// Check if the endpoint is usable.
    pub fn is_configured(&self) -> bool {
        normalize_text_option(self.url.clone()).is_some()
    }
}

/// Full configuration surface recognized by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Primary storage tier for entity writes
    pub primary_storage: StorageChoice,
    /// Fallback tier used when the primary write or read fails
    pub fallback_storage: StorageChoice,
    /// Schema version tag stamped into every envelope
    pub schema_version: String,
    /// Auto-save interval in seconds (consumed by the application shell)
    pub auto_save_interval_secs: u64,
    /// Debounce window for change-triggered work, milliseconds
    pub debounce_millis: u64,
    /// Bounded depth of per-entity version history
    pub max_version_history: usize,
    /// Whether the app starts in offline mode
    pub offline_mode: bool,
    /// Byte budget for offline-queued payloads
    pub offline_storage_limit: usize,
    /// Max sync attempts per queue item before it is marked failed
    pub max_retries: u32,
    /// Whether payloads above the threshold are compressed
    pub compression_enabled: bool,
    /// Compression threshold in bytes
    pub compression_threshold: usize,
    /// Automatic sync pass interval in seconds
    pub sync_interval_secs: u64,
    /// Queue items delivered per batch
    pub batch_size: usize,
    /// Delay between batches, milliseconds
    pub batch_delay_millis: u64,
    /// Conflict resolution strategy
    pub conflict_strategy: ConflictStrategy,
    /// Remote endpoint settings
    pub endpoint: SyncEndpointConfig,
    /// Per-request timeout for remote calls, seconds
    pub request_timeout_secs: u64,
    /// Default TTL for ephemeral entries, minutes
    pub ephemeral_ttl_minutes: i64,
    /// Per-entry size cap for the ephemeral store, bytes
    pub ephemeral_max_entry_bytes: usize,
    /// Whether ephemeral entries are encrypted at rest
    pub ephemeral_encryption: bool,
    /// Read-cache byte budget for the structured store
    pub cache_max_bytes: usize,
    /// Periodic integrity check interval in seconds
    pub integrity_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary_storage: StorageChoice::Structured,
            fallback_storage: StorageChoice::KeyValue,
            schema_version: "1.2.0".to_string(),
            auto_save_interval_secs: 30,
            debounce_millis: 500,
            max_version_history: 10,
            offline_mode: false,
            offline_storage_limit: 50 * 1024 * 1024,
            max_retries: 3,
            compression_enabled: true,
            compression_threshold: 1024,
            sync_interval_secs: 60,
            batch_size: 10,
            batch_delay_millis: 100,
            conflict_strategy: ConflictStrategy::Timestamp,
            endpoint: SyncEndpointConfig::default(),
            request_timeout_secs: 15,
            ephemeral_ttl_minutes: 30,
            ephemeral_max_entry_bytes: 256 * 1024,
            ephemeral_encryption: false,
            cache_max_bytes: 4 * 1024 * 1024,
            integrity_interval_secs: 300,
        }
    }
}

impl StoreConfig {
    /// Set the remote endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: SyncEndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the conflict resolution strategy.
    #[must_use]
    pub const fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Start in offline mode.
    #[must_use]
    pub const fn offline(mut self) -> Self {
        self.offline_mode = true;
        self
    }

    /// Request timeout as a `Duration`.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Inter-batch delay as a `Duration`.
    pub const fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_millis)
    }

    /// Periodic integrity check interval as a `Duration`.
    pub const fn integrity_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_interval_secs)
    }
}
