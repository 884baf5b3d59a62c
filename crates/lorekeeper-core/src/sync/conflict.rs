//! Conflict persistence and resolution strategies.

use crate::config::ConflictStrategy;
use crate::error::Result;
use crate::models::ConflictItem;
use crate::store::StructuredStore;

const CONFLICT_STORE: &str = "sync_conflicts";

/// Which side a resolved conflict keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    UseLocal,
    UseRemote,
}

/// Explicit resolution for manually resolved conflicts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Keep the local payload
    UseLocal,
    /// Take the remote payload
    UseRemote,
    /// Apply caller-merged data
    Merge(serde_json::Value),
}

/// Decide a conflict under the configured strategy. `None` means the
/// conflict waits for manual resolution.
pub fn decide(strategy: ConflictStrategy, conflict: &ConflictItem) -> Option<ConflictDecision> {
    match strategy {
        ConflictStrategy::Client => Some(ConflictDecision::UseLocal),
        ConflictStrategy::Server => Some(ConflictDecision::UseRemote),
        ConflictStrategy::Timestamp => {
            if conflict.local_timestamp > conflict.remote_timestamp {
                Some(ConflictDecision::UseLocal)
            } else {
                Some(ConflictDecision::UseRemote)
            }
        }
        ConflictStrategy::Manual => None,
    }
}

/// Persisted conflict list. Mutated only by the sync manager.
#[derive(Clone)]
pub struct ConflictLog {
    store: StructuredStore,
}

impl ConflictLog {
    /// Create a log over the given structured store.
    pub const fn new(store: StructuredStore) -> Self {
        Self { store }
    }

    /// Record a new conflict. Conflicts are never dropped silently.
    pub async fn record(&self, conflict: &ConflictItem) -> Result<()> {
        let payload = serde_json::to_string(conflict)?;
        self.store.put(CONFLICT_STORE, &conflict.id, payload).await
    }

    /// All unresolved conflicts, oldest first.
    pub async fn pending(&self) -> Result<Vec<ConflictItem>> {
        let mut conflicts = Vec::new();
        for id in self.store.keys(CONFLICT_STORE).await? {
            if let Some(payload) = self.store.get(CONFLICT_STORE, &id).await? {
                match serde_json::from_str::<ConflictItem>(&payload) {
                    Ok(conflict) => conflicts.push(conflict),
                    Err(error) => {
                        tracing::warn!("Skipping unreadable conflict {id}: {error}");
                    }
                }
            }
        }
        conflicts.sort_by(|a, b| a.local_timestamp.cmp(&b.local_timestamp));
        Ok(conflicts)
    }

    /// Look up one conflict.
    pub async fn get(&self, id: &str) -> Result<Option<ConflictItem>> {
        match self.store.get(CONFLICT_STORE, id).await? {
            Some(payload) => Ok(serde_json::from_str(&payload).ok()),
            None => Ok(None),
        }
    }

    /// Remove a resolved conflict.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.delete(CONFLICT_STORE, id).await
    }

    /// Number of unresolved conflicts.
    pub async fn len(&self) -> Result<u64> {
        self.store.count(CONFLICT_STORE).await
    }

    /// Whether the log is empty.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
