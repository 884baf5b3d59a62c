//! Error types for lorekeeper-core

use thiserror::Error;

/// Result type alias using lorekeeper-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lorekeeper-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-tier error with tier context
    #[error("Storage error ({tier}): {message}")]
    Storage {
        /// Tier that produced the failure
        tier: String,
        /// Failure description
        message: String,
    },

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage quota exceeded; the write was rejected, not silently dropped
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Entry rejected because it exceeds the per-entry size cap
    #[error("Entry too large: {size} bytes (limit {limit})")]
    EntryTooLarge {
        /// Serialized entry size
        size: usize,
        /// Configured cap
        limit: usize,
    },

    /// Stored checksum did not match the decoded payload
    #[error("Checksum mismatch for {store}/{id}")]
    ChecksumMismatch {
        /// Store the item was read from
        store: String,
        /// Item id
        id: String,
    },

    /// No registered migration edge covers the requested versions
    #[error("No migration path from {from} to {to}")]
    NoMigrationPath {
        /// Starting version tag
        from: String,
        /// Requested version tag
        to: String,
    },

    /// A migration step failed; the chain was aborted
    #[error("Migration step {from} -> {to} failed: {message}")]
    MigrationStep {
        /// Step's source version
        from: String,
        /// Step's target version
        to: String,
        /// Failure description
        message: String,
    },

    /// Backup checksum verification failed; restore refused
    #[error("Backup verification failed: {0}")]
    BackupVerification(String),

    /// HTTP error from the remote sync endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sync failure that exhausted retries or cannot be retried
    #[error("Sync error: {0}")]
    Sync(String),

    /// Encryption/decryption failure in the ephemeral tier
    #[error("Crypto error: {0}")]
    Crypto(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_includes_tier() {
        let error = Error::Storage {
            tier: "sqlite".to_string(),
            message: "disk full".to_string(),
        };
        assert_eq!(error.to_string(), "Storage error (sqlite): disk full");
    }

    #[test]
    fn no_migration_path_names_versions() {
        let error = Error::NoMigrationPath {
            from: "1.0.0".to_string(),
            to: "9.9.9".to_string(),
        };
        assert!(error.to_string().contains("1.0.0"));
        assert!(error.to_string().contains("9.9.9"));
    }
}
