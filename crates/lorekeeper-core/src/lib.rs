//! lorekeeper-core - Core library for Lorekeeper
//!
//! Offline-first persistence and synchronization for campaign data: a
//! structured SQLite store with a key-value fallback, an encrypted ephemeral
//! cache, an offline mutation queue with conflict handling, schema
//! migrations with safety backups, and periodic integrity checks.

pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod integrity;
pub mod migration;
pub mod models;
pub mod persistence;
pub mod store;
pub mod sync;
pub mod util;

pub use config::{ConflictStrategy, StorageChoice, StoreConfig, SyncEndpointConfig};
pub use error::{Error, Result};
pub use models::{Campaign, Character, Entity, EntityKind, Preferences, Session};
pub use persistence::PersistenceManager;
pub use sync::SyncManager;
