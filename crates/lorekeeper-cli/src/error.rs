use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] lorekeeper_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Backup not found for id/prefix: {0}")]
    BackupNotFound(String),
    #[error("{0}")]
    AmbiguousBackupId(String),
    #[error("Conflict not found for id: {0}")]
    ConflictNotFound(String),
    #[error(
        "Sync is not configured. Set LOREKEEPER_SYNC_URL (and optionally LOREKEEPER_SYNC_TOKEN)."
    )]
    SyncNotConfigured,
    #[error("Configuration error: {0}")]
    Config(String),
}
