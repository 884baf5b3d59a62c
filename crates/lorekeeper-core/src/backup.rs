//! Checksummed point-in-time backups.
//!
//! Backups are immutable once created; restore paths verify the checksum
//! before touching any data and fail closed on mismatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::checksum_hex;
use crate::error::{Error, Result};
use crate::store::StructuredStore;

const BACKUP_STORE: &str = "backups";
const METADATA_STORE: &str = "backup_metadata";

/// Describes one backup without carrying its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Backup id
    pub id: String,
    /// Schema version the data was written under
    pub version: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Application version that produced the backup
    pub app_version: String,
    /// Serialized payload size in bytes
    pub size: usize,
    /// Free-text label, e.g. `manual` or `pre-migration`
    pub label: String,
}

/// A full point-in-time snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupData {
    /// Backup description
    pub metadata: BackupMetadata,
    /// Entity collections keyed by store name, plus preferences
    pub collections: serde_json::Value,
    /// SHA-256 hex digest of the serialized collections
    pub checksum: String,
}

impl BackupData {
    /// Create a checksummed backup of the given collections.
    pub fn create(
        collections: serde_json::Value,
        version: impl Into<String>,
        app_version: impl Into<String>,
        label: impl Into<String>,
    ) -> Result<Self> {
        let serialized = serde_json::to_vec(&collections)?;
        let checksum = checksum_hex(&serialized);
        Ok(Self {
            metadata: BackupMetadata {
                id: Uuid::new_v4().to_string(),
                version: version.into(),
                timestamp: Utc::now(),
                app_version: app_version.into(),
                size: serialized.len(),
                label: label.into(),
            },
            collections,
            checksum,
        })
    }

    /// Verify the checksum against the collections. Fails closed.
    pub fn verify(&self) -> Result<()> {
        let serialized = serde_json::to_vec(&self.collections)?;
        let actual = checksum_hex(&serialized);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(Error::BackupVerification(format!(
                "backup {} checksum mismatch",
                self.metadata.id
            )))
        }
    }
}

/// Persistence for backup objects and their metadata records.
#[derive(Clone)]
pub struct BackupStore {
    store: StructuredStore,
}

impl BackupStore {
    /// Create a backup store over the structured database.
    pub const fn new(store: StructuredStore) -> Self {
        Self { store }
    }

    /// Persist a backup and its metadata record.
    pub async fn save(&self, backup: &BackupData) -> Result<()> {
        let payload = serde_json::to_string(backup)?;
        self.store
            .put(BACKUP_STORE, &backup.metadata.id, payload)
            .await?;
        let metadata = serde_json::to_string(&backup.metadata)?;
        self.store
            .put(METADATA_STORE, &backup.metadata.id, metadata)
            .await?;
        tracing::info!(
            "Created backup {} ({}, {} bytes)",
            backup.metadata.id,
            backup.metadata.label,
            backup.metadata.size
        );
        Ok(())
    }

    /// Load and verify a backup by id.
    pub async fn load(&self, id: &str) -> Result<BackupData> {
        let payload = self
            .store
            .get(BACKUP_STORE, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("backup {id}")))?;
        let backup: BackupData = serde_json::from_str(&payload)?;
        backup.verify()?;
        Ok(backup)
    }

    /// Metadata for every stored backup, newest first.
    pub async fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut out = Vec::new();
        for id in self.store.keys(METADATA_STORE).await? {
            if let Some(payload) = self.store.get(METADATA_STORE, &id).await? {
                if let Ok(metadata) = serde_json::from_str::<BackupMetadata>(&payload) {
                    out.push(metadata);
                }
            }
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    /// Delete a backup and its metadata record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(BACKUP_STORE, id).await?;
        self.store.delete(METADATA_STORE, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::default_schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> BackupStore {
        let store = StructuredStore::open_in_memory(default_schema(), 1024 * 1024)
            .await
            .unwrap();
        BackupStore::new(store)
    }

    #[test]
    fn verify_passes_for_untouched_backup() {
        let backup = BackupData::create(json!({"campaigns": []}), "1.2.0", "0.1.0", "manual")
            .unwrap();
        backup.verify().unwrap();
    }

    #[test]
    fn verify_fails_closed_after_tampering() {
        let mut backup =
            BackupData::create(json!({"campaigns": []}), "1.2.0", "0.1.0", "manual").unwrap();
        backup.collections = json!({"campaigns": [{"id": "injected"}]});
        assert!(matches!(
            backup.verify(),
            Err(Error::BackupVerification(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_load_round_trips() {
        let backups = setup().await;
        let backup = BackupData::create(
            json!({"campaigns": [{"id": "c1", "title": "Test"}]}),
            "1.2.0",
            "0.1.0",
            "manual",
        )
        .unwrap();
        backups.save(&backup).await.unwrap();

        let loaded = backups.load(&backup.metadata.id).await.unwrap();
        assert_eq!(loaded, backup);

        let listed = backups.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].label, "manual");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_backup_and_metadata() {
        let backups = setup().await;
        let backup = BackupData::create(json!({}), "1.2.0", "0.1.0", "manual").unwrap();
        backups.save(&backup).await.unwrap();
        backups.delete(&backup.metadata.id).await.unwrap();
        assert!(backups.load(&backup.metadata.id).await.is_err());
        assert!(backups.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_backup_is_not_found() {
        let backups = setup().await;
        assert!(matches!(
            backups.load("ghost").await,
            Err(Error::NotFound(_))
        ));
    }
}
