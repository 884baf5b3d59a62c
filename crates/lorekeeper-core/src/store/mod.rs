//! Storage tiers and their shared seams.

mod cache;
mod ephemeral;
mod kv;
mod schema;
mod sqlite;

use async_trait::async_trait;

use crate::error::Result;

pub use cache::{CacheStats, EvictionPolicy, HitRateAged, Lru, ReadCache};
pub use ephemeral::{EphemeralScope, EphemeralStore};
pub use kv::{FileKvStore, MemoryKvStore};
pub use schema::{default_schema, IndexSpec, StoreSchema};
pub use sqlite::{IndexFilter, StoreStats, StructuredStore, WriteOp};

/// A storage tier keyed by (named store, entity id), holding serialized
/// envelopes as JSON text.
///
/// Implemented by the structured SQLite store and the plain key-value
/// fallback; an in-memory implementation backs tests.
#[async_trait]
pub trait StorageTier: Send + Sync {
    /// Short tier name used in logs and error context.
    fn tier_name(&self) -> &'static str;

    /// Write an entry, replacing any previous value.
    async fn write(&self, store: &str, id: &str, payload: String) -> Result<()>;

    /// Read an entry, `None` when absent.
    async fn read(&self, store: &str, id: &str) -> Result<Option<String>>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn remove(&self, store: &str, id: &str) -> Result<()>;

    /// All ids currently present in a store.
    async fn keys(&self, store: &str) -> Result<Vec<String>>;

    /// Remove every entry in a store.
    async fn clear(&self, store: &str) -> Result<()>;
}
