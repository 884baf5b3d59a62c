//! Shared wiring for every command: configuration, storage, and managers.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lorekeeper_core::config::{StoreConfig, SyncEndpointConfig};
use lorekeeper_core::integrity::IntegrityMonitor;
use lorekeeper_core::migration::{default_registry, MigrationManager};
use lorekeeper_core::store::{default_schema, FileKvStore, StructuredStore};
use lorekeeper_core::sync::{ConflictLog, ConnectionStatus, HttpRemote, SyncManager, SyncQueue};
use lorekeeper_core::PersistenceManager;

use crate::error::CliError;

const SYNC_URL_ENV: &str = "LOREKEEPER_SYNC_URL";
const SYNC_TOKEN_ENV: &str = "LOREKEEPER_SYNC_TOKEN";

/// Everything a command can need, wired once per invocation.
pub struct AppStack {
    pub persistence: PersistenceManager,
    /// Present only when a sync endpoint is configured
    pub sync: Option<SyncManager>,
    pub integrity: IntegrityMonitor,
    pub migration: MigrationManager,
}

/// Database location: `--db-path`, or the platform data directory.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lorekeeper")
            .join("lorekeeper.db")
    })
}

fn endpoint_from_env() -> Option<SyncEndpointConfig> {
    let url = env::var(SYNC_URL_ENV).ok()?;
    if url.trim().is_empty() {
        return None;
    }
    Some(SyncEndpointConfig {
        url: Some(url),
        auth_token: env::var(SYNC_TOKEN_ENV).ok(),
    })
}

/// Open the full storage stack at `db_path` and run any pending migrations.
pub async fn open_stack(db_path: &Path, offline: bool) -> Result<AppStack, CliError> {
    let mut config = StoreConfig {
        offline_mode: offline,
        ..StoreConfig::default()
    };
    if let Some(endpoint) = endpoint_from_env() {
        config.endpoint = endpoint;
    }

    let structured =
        StructuredStore::open(db_path, default_schema(), config.cache_max_bytes).await?;
    let fallback_root = db_path
        .parent()
        .map_or_else(|| PathBuf::from("fallback"), |dir| dir.join("fallback"));
    let kv = Arc::new(FileKvStore::new(fallback_root));

    let queue = SyncQueue::new(structured.clone(), config.offline_storage_limit);
    let status = ConnectionStatus::new(!config.offline_mode);
    let persistence = PersistenceManager::new(
        structured.clone(),
        kv,
        queue,
        status,
        config.clone(),
    );

    let migration = MigrationManager::new(
        persistence.clone(),
        structured.clone(),
        default_registry(),
    );
    if let Some(report) = migration.migrate().await? {
        tracing::info!(
            "Migrated data {} -> {} ({} entities)",
            report.from,
            report.to,
            report.entities_migrated
        );
    }

    let sync = if config.endpoint.is_configured() {
        let remote = HttpRemote::new(&config.endpoint, &config)?;
        Some(SyncManager::new(
            persistence.clone(),
            ConflictLog::new(structured),
            Arc::new(remote),
        ))
    } else {
        None
    };

    let integrity = IntegrityMonitor::new(persistence.clone());

    Ok(AppStack {
        persistence,
        sync,
        integrity,
        migration,
    })
}

impl AppStack {
    /// The sync manager, or the configuration error explaining its absence.
    pub fn sync_required(&self) -> Result<&SyncManager, CliError> {
        self.sync.as_ref().ok_or(CliError::SyncNotConfigured)
    }
}
