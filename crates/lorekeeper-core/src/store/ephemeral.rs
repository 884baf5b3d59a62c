//! Session-scoped key-value store with per-entry expiry.
//!
//! This tier is intentionally non-durable: entries live in memory, and when
//! encryption is enabled the key is generated per instance and never written
//! anywhere, so nothing here survives a restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::codec::EphemeralCipher;
use crate::error::{Error, Result};

/// Namespaces the ephemeral store is partitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralScope {
    FormDrafts,
    AiContext,
    Session,
    Preferences,
    TempData,
}

impl fmt::Display for EphemeralScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FormDrafts => "form_drafts",
            Self::AiContext => "ai_context",
            Self::Session => "session",
            Self::Preferences => "preferences",
            Self::TempData => "temp_data",
        };
        f.write_str(name)
    }
}

struct Entry {
    payload: Vec<u8>,
    expires_at: DateTime<Utc>,
}

struct Shared {
    entries: Mutex<HashMap<(EphemeralScope, String), Entry>>,
    cipher: Option<EphemeralCipher>,
    default_ttl_minutes: i64,
    max_entry_bytes: usize,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Handle to the ephemeral store. Cheap to clone.
#[derive(Clone)]
pub struct EphemeralStore {
    shared: Arc<Shared>,
}

impl EphemeralStore {
    /// Create a store with the given default TTL and size cap.
    ///
    /// When `encrypted` is set every payload is sealed with a fresh
    /// per-instance key.
    pub fn new(default_ttl_minutes: i64, max_entry_bytes: usize, encrypted: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                cipher: encrypted.then(EphemeralCipher::new),
                default_ttl_minutes,
                max_entry_bytes,
                sweeper: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Create a store from the configured TTL, size cap, and encryption flag.
    pub fn from_config(config: &crate::config::StoreConfig) -> Self {
        Self::new(
            config.ephemeral_ttl_minutes,
            config.ephemeral_max_entry_bytes,
            config.ephemeral_encryption,
        )
    }

    /// Store a value. `ttl_minutes` overrides the configured default.
    ///
    /// Expiry is computed at write time; oversized entries are rejected
    /// before anything is stored.
    pub async fn set<T: Serialize>(
        &self,
        scope: EphemeralScope,
        key: &str,
        value: &T,
        ttl_minutes: Option<i64>,
    ) -> Result<()> {
        let serialized = serde_json::to_vec(value)?;
        if serialized.len() > self.shared.max_entry_bytes {
            return Err(Error::EntryTooLarge {
                size: serialized.len(),
                limit: self.shared.max_entry_bytes,
            });
        }

        let payload = match &self.shared.cipher {
            Some(cipher) => cipher.seal(&serialized)?,
            None => serialized,
        };
        let ttl = ttl_minutes.unwrap_or(self.shared.default_ttl_minutes);
        let expires_at = Utc::now() + chrono::Duration::minutes(ttl);

        let mut entries = self.shared.entries.lock().await;
        entries.insert((scope, key.to_string()), Entry { payload, expires_at });
        Ok(())
    }

    /// Fetch a value, purging it lazily when expired.
    pub async fn get<T: DeserializeOwned>(
        &self,
        scope: EphemeralScope,
        key: &str,
    ) -> Result<Option<T>> {
        let mut entries = self.shared.entries.lock().await;
        let map_key = (scope, key.to_string());
        let Some(entry) = entries.get(&map_key) else {
            return Ok(None);
        };
        if entry.expires_at <= Utc::now() {
            entries.remove(&map_key);
            return Ok(None);
        }
        let serialized = match &self.shared.cipher {
            Some(cipher) => cipher.open(&entry.payload)?,
            None => entry.payload.clone(),
        };
        Ok(Some(serde_json::from_slice(&serialized)?))
    }

    /// Remove an entry if present.
    pub async fn remove(&self, scope: EphemeralScope, key: &str) {
        let mut entries = self.shared.entries.lock().await;
        entries.remove(&(scope, key.to_string()));
    }

    /// Drop every entry in a scope.
    pub async fn clear_scope(&self, scope: EphemeralScope) {
        let mut entries = self.shared.entries.lock().await;
        entries.retain(|(entry_scope, _), _| *entry_scope != scope);
    }

    /// Purge expired entries. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.shared.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of live entries in a scope (expired entries excluded).
    pub async fn len(&self, scope: EphemeralScope) -> usize {
        let now = Utc::now();
        let entries = self.shared.entries.lock().await;
        entries
            .iter()
            .filter(|((entry_scope, _), entry)| *entry_scope == scope && entry.expires_at > now)
            .count()
    }

    /// Whether a scope has no live entries.
    pub async fn is_empty(&self, scope: EphemeralScope) -> bool {
        self.len(scope).await == 0
    }

    /// Start the periodic sweeper. A previous sweeper is cancelled first.
    pub fn start_sweeper(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else { break };
                let now = Utc::now();
                let mut entries = shared.entries.lock().await;
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                let removed = before - entries.len();
                if removed > 0 {
                    tracing::debug!("Ephemeral sweep removed {removed} expired entries");
                }
            }
        });
        let mut guard = self
            .shared
            .sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the periodic sweeper.
    pub fn stop_sweeper(&self) {
        let mut guard = self
            .shared
            .sweeper
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}
