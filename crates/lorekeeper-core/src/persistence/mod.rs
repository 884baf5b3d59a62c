//! Persistence manager: the save/load façade over both storage tiers.
//!
//! Owns the write path exclusively. Writes go to the configured primary tier
//! and fall back to the secondary tier on failure; only when both tiers fail
//! does a save error reach the caller. Corruption found on reads is recorded
//! for the integrity monitor instead of failing the read.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backup::{BackupData, BackupMetadata, BackupStore};
use crate::codec::{checksum_hex, Codec, GzipCodec};
use crate::config::{StorageChoice, StoreConfig};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind, StorageItem, SyncAction, SyncItem, SyncPriority};
use crate::store::{CacheStats, IndexFilter, StorageTier, StoreStats, StructuredStore};
use crate::sync::{ConnectionStatus, SyncQueue};

const HISTORY_STORE: &str = "version_history";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Options for `save`.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Append a version-history record
    pub use_versioning: bool,
    /// Do not enqueue an offline mutation even when disconnected
    pub skip_offline_queue: bool,
    /// Bypass tier selection and write to this tier only
    pub force_tier: Option<StorageChoice>,
    /// Queue priority for the offline mutation
    pub priority: SyncPriority,
}

/// Options for `load`.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Bypass tier selection and read from this tier only
    pub force_tier: Option<StorageChoice>,
    /// Recompute and verify the payload checksum
    pub validate_checksum: bool,
}

/// What a save actually did, for callers and tests.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    /// Entity id
    pub id: String,
    /// Checksum of the uncompressed payload
    pub checksum: String,
    /// Serialized payload size in bytes
    pub size: usize,
    /// Whether the stored payload was compressed
    pub compressed: bool,
    /// Tier the envelope landed in
    pub tier: &'static str,
    /// Whether an offline mutation was queued
    pub queued: bool,
}

/// A recorded prior snapshot of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Record id
    pub id: String,
    /// Composite `kind:id` key the history index groups by
    pub entity_id: String,
    /// Snapshot time
    pub timestamp: DateTime<Utc>,
    /// Schema version at snapshot time
    pub version: String,
    /// Payload checksum
    pub checksum: String,
    /// The snapshotted payload
    pub data: serde_json::Value,
}

/// Checksum mismatch observed on a read; drained by the integrity monitor.
#[derive(Debug, Clone, Serialize)]
pub struct CorruptionEvent {
    pub store: String,
    pub id: String,
    pub expected: String,
    pub actual: String,
    pub detected_at: DateTime<Utc>,
}

/// Outcome of one storage-tier health probe.
#[derive(Debug, Clone, Serialize)]
pub struct TierProbe {
    pub tier: &'static str,
    pub ok: bool,
    pub message: Option<String>,
}

/// Combined storage statistics for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct StorageOverview {
    pub stores: Vec<StoreStats>,
    pub cache: CacheStats,
    pub queue_length: u64,
}

/// The persistence façade. Constructed once at application start and shared.
#[derive(Clone)]
pub struct PersistenceManager {
    structured: StructuredStore,
    kv: Arc<dyn StorageTier>,
    backups: BackupStore,
    queue: SyncQueue,
    status: ConnectionStatus,
    config: StoreConfig,
    codec: Arc<dyn Codec>,
    corruption: Arc<std::sync::Mutex<Vec<CorruptionEvent>>>,
}

impl PersistenceManager {
    /// Wire the manager over its storage tiers and queue.
    pub fn new(
        structured: StructuredStore,
        kv: Arc<dyn StorageTier>,
        queue: SyncQueue,
        status: ConnectionStatus,
        config: StoreConfig,
    ) -> Self {
        let backups = BackupStore::new(structured.clone());
        Self {
            structured,
            kv,
            backups,
            queue,
            status,
            config,
            codec: Arc::new(GzipCodec),
            corruption: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    fn tier(&self, choice: StorageChoice) -> Arc<dyn StorageTier> {
        match choice {
            StorageChoice::Structured => Arc::new(self.structured.clone()),
            StorageChoice::KeyValue => Arc::clone(&self.kv),
        }
    }

    /// The backup store, shared with the migration manager.
    pub const fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// The offline queue handle.
    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Connectivity flag shared with the sync manager.
    pub const fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Active configuration.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Save a payload under (kind, id).
    ///
    /// A `null` payload is treated as deletion. Quota and serialization
    /// failures are returned; only after the fallback tier has also failed
    /// does a storage error surface.
    pub async fn save(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
        options: SaveOptions,
    ) -> Result<SaveReceipt> {
        if data.is_null() {
            self.delete(kind, id, options.skip_offline_queue).await?;
            return Ok(SaveReceipt {
                id: id.to_string(),
                checksum: String::new(),
                size: 0,
                compressed: false,
                tier: "deleted",
                queued: !options.skip_offline_queue && !self.status.is_online(),
            });
        }

        let serialized = serde_json::to_vec(data)?;
        let checksum = checksum_hex(&serialized);
        let size = serialized.len();
        let offline = !self.status.is_online();

        let existed = self.read_raw(kind.store_name(), id, None).await.is_some();

        let (stored_data, compressed) =
            if self.config.compression_enabled && size > self.config.compression_threshold {
                let packed = self.codec.compress(&serialized)?;
                (serde_json::Value::String(BASE64.encode(packed)), true)
            } else {
                (data.clone(), false)
            };

        let mut item = StorageItem::new(id, stored_data, self.config.schema_version.as_str(), size, checksum.as_str());
        item.is_compressed = compressed;
        item.is_offline = offline;
        let payload = serde_json::to_string(&item)?;

        let tier = self
            .write_with_fallback(kind.store_name(), id, payload, options.force_tier)
            .await?;

        if options.use_versioning {
            self.append_history(kind, id, data, &checksum).await?;
        }

        let mut queued = false;
        if offline && !options.skip_offline_queue {
            let action = if existed {
                SyncAction::Update
            } else {
                SyncAction::Create
            };
            let sync_item = SyncItem::new(
                kind,
                id,
                action,
                data.clone(),
                self.config.schema_version.as_str(),
                checksum.as_str(),
            )
            .with_priority(options.priority);
            self.queue.enqueue(sync_item).await?;
            queued = true;
        }

        Ok(SaveReceipt {
            id: id.to_string(),
            checksum,
            size,
            compressed,
            tier,
            queued,
        })
    }

    /// Load a payload. Reads try the primary tier, then the fallback.
    ///
    /// A checksum mismatch is logged and recorded, and the decoded data is
    /// still returned; corruption must not block reads.
    pub async fn load(
        &self,
        kind: EntityKind,
        id: &str,
        options: LoadOptions,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self.load_item(kind, id, options).await?.map(|item| item.data))
    }

    /// Load the full envelope with the payload decompressed.
    pub async fn load_item(
        &self,
        kind: EntityKind,
        id: &str,
        options: LoadOptions,
    ) -> Result<Option<StorageItem<serde_json::Value>>> {
        let store = kind.store_name();
        let Some(payload) = self.read_raw(store, id, options.force_tier).await else {
            return Ok(None);
        };
        let mut item: StorageItem<serde_json::Value> = serde_json::from_str(&payload)?;

        if item.is_compressed {
            let encoded = item
                .data
                .as_str()
                .ok_or_else(|| Error::InvalidInput("compressed payload is not a string".into()))?;
            let packed = BASE64
                .decode(encoded)
                .map_err(|error| Error::InvalidInput(format!("invalid base64 payload: {error}")))?;
            let serialized = self.codec.decompress(&packed)?;
            item.data = serde_json::from_slice(&serialized)?;
            item.is_compressed = false;
        }

        if options.validate_checksum {
            let serialized = serde_json::to_vec(&item.data)?;
            let actual = checksum_hex(&serialized);
            if actual != item.checksum {
                tracing::error!("Checksum mismatch reading {store}/{id}");
                self.record_corruption(CorruptionEvent {
                    store: store.to_string(),
                    id: id.to_string(),
                    expected: item.checksum.clone(),
                    actual,
                    detected_at: Utc::now(),
                });
            }
        }

        Ok(Some(item))
    }

    /// Remove an entity from both tiers, queuing a delete when offline.
    pub async fn delete(&self, kind: EntityKind, id: &str, skip_offline_queue: bool) -> Result<()> {
        let store = kind.store_name();
        let primary = self.tier(self.config.primary_storage);
        let fallback = self.tier(self.config.fallback_storage);
        let primary_result = primary.remove(store, id).await;
        let fallback_result = fallback.remove(store, id).await;
        primary_result.or(fallback_result)?;

        if !self.status.is_online() && !skip_offline_queue {
            let item = SyncItem::new(
                kind,
                id,
                SyncAction::Delete,
                serde_json::Value::Object(serde_json::Map::new()),
                self.config.schema_version.as_str(),
                "",
            );
            self.queue.enqueue(item).await?;
        }
        Ok(())
    }

    /// Save a typed entity with versioning on.
    pub async fn save_entity(&self, entity: &Entity) -> Result<SaveReceipt> {
        let data = serde_json::to_value(entity)?;
        self.save(
            entity.kind(),
            entity.id(),
            &data,
            SaveOptions {
                use_versioning: true,
                ..SaveOptions::default()
            },
        )
        .await
    }

    /// Load a typed value.
    pub async fn load_typed<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<T>> {
        match self.load(kind, id, LoadOptions::default()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Prior snapshots for an entity, newest first.
    pub async fn version_history(&self, kind: EntityKind, id: &str) -> Result<Vec<VersionRecord>> {
        let rows = self
            .structured
            .query(
                HISTORY_STORE,
                &IndexFilter::Equals {
                    index: "entity_id".to_string(),
                    value: history_key(kind, id),
                },
            )
            .await?;
        let mut records = Vec::new();
        for (_, payload) in rows {
            if let Ok(record) = serde_json::from_str::<VersionRecord>(&payload) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Roll an entity back to the snapshot taken at `timestamp`.
    pub async fn restore_from_history(
        &self,
        kind: EntityKind,
        id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<SaveReceipt> {
        let history = self.version_history(kind, id).await?;
        let record = history
            .into_iter()
            .find(|record| record.timestamp == timestamp)
            .ok_or_else(|| {
                Error::NotFound(format!("no snapshot of {kind}/{id} at {timestamp}"))
            })?;
        self.save(
            kind,
            id,
            &record.data,
            SaveOptions {
                use_versioning: true,
                ..SaveOptions::default()
            },
        )
        .await
    }

    /// Snapshot every entity collection into a checksummed backup.
    pub async fn create_backup(&self, label: &str) -> Result<BackupData> {
        let mut collections = serde_json::Map::new();
        for kind in EntityKind::ALL {
            let entities = self.collect_store(kind).await?;
            collections.insert(kind.store_name().to_string(), serde_json::Value::Array(entities));
        }
        let backup = BackupData::create(
            serde_json::Value::Object(collections),
            self.config.schema_version.as_str(),
            APP_VERSION,
            label,
        )?;
        self.backups.save(&backup).await?;
        Ok(backup)
    }

    /// Verify a backup, clear current data, and replay its collections.
    pub async fn restore_from_backup(&self, backup: &BackupData) -> Result<usize> {
        backup.verify()?;

        for kind in EntityKind::ALL {
            let store = kind.store_name();
            self.tier(self.config.primary_storage).clear(store).await?;
            self.tier(self.config.fallback_storage).clear(store).await?;
        }

        let mut restored = 0;
        for kind in EntityKind::ALL {
            let Some(entities) = backup
                .collections
                .get(kind.store_name())
                .and_then(serde_json::Value::as_array)
            else {
                continue;
            };
            for entity in entities {
                let Some(id) = entity.get("id").and_then(serde_json::Value::as_str) else {
                    tracing::warn!("Skipping backup entity without id in {}", kind.store_name());
                    continue;
                };
                self.save(
                    kind,
                    id,
                    entity,
                    SaveOptions {
                        skip_offline_queue: true,
                        ..SaveOptions::default()
                    },
                )
                .await?;
                restored += 1;
            }
        }
        tracing::info!("Restored {restored} entities from backup {}", backup.metadata.id);
        Ok(restored)
    }

    /// List stored backups.
    pub async fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        self.backups.list().await
    }

    /// All ids present for a kind, merged across tiers.
    pub async fn entity_ids(&self, kind: EntityKind) -> Result<Vec<String>> {
        let store = kind.store_name();
        let mut ids = self.tier(self.config.primary_storage).keys(store).await?;
        for id in self.tier(self.config.fallback_storage).keys(store).await? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Combined storage statistics.
    pub async fn storage_overview(&self) -> Result<StorageOverview> {
        Ok(StorageOverview {
            stores: self.structured.store_stats().await?,
            cache: self.structured.cache_stats().await,
            queue_length: self.queue.len().await?,
        })
    }

    /// Round-trip a probe record through both tiers to confirm they are
    /// readable and writable.
    pub async fn probe_tiers(&self) -> Vec<TierProbe> {
        let mut probes = Vec::with_capacity(2);
        for choice in [self.config.primary_storage, self.config.fallback_storage] {
            let tier = self.tier(choice);
            probes.push(probe_tier(tier.as_ref()).await);
        }
        probes
    }

    /// Drain corruption events observed since the last call.
    pub fn take_corruption_events(&self) -> Vec<CorruptionEvent> {
        let mut guard = self
            .corruption
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }

    fn record_corruption(&self, event: CorruptionEvent) {
        let mut guard = self
            .corruption
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.push(event);
    }

    async fn write_with_fallback(
        &self,
        store: &str,
        id: &str,
        payload: String,
        force: Option<StorageChoice>,
    ) -> Result<&'static str> {
        if let Some(choice) = force {
            let tier = self.tier(choice);
            tier.write(store, id, payload).await?;
            return Ok(tier.tier_name());
        }

        let primary = self.tier(self.config.primary_storage);
        match primary.write(store, id, payload.clone()).await {
            Ok(()) => Ok(primary.tier_name()),
            Err(primary_error) => {
                tracing::warn!(
                    "Primary tier {} failed writing {store}/{id}: {primary_error}; trying fallback",
                    primary.tier_name()
                );
                let fallback = self.tier(self.config.fallback_storage);
                match fallback.write(store, id, payload).await {
                    Ok(()) => Ok(fallback.tier_name()),
                    Err(fallback_error) => {
                        tracing::error!(
                            "Fallback tier {} also failed writing {store}/{id}: {fallback_error}",
                            fallback.tier_name()
                        );
                        Err(fallback_error)
                    }
                }
            }
        }
    }

    async fn read_raw(&self, store: &str, id: &str, force: Option<StorageChoice>) -> Option<String> {
        if let Some(choice) = force {
            return self.tier(choice).read(store, id).await.ok().flatten();
        }
        let primary = self.tier(self.config.primary_storage);
        match primary.read(store, id).await {
            Ok(Some(payload)) => return Some(payload),
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    "Primary tier {} failed reading {store}/{id}: {error}; trying fallback",
                    primary.tier_name()
                );
            }
        }
        self.tier(self.config.fallback_storage)
            .read(store, id)
            .await
            .ok()
            .flatten()
    }

    async fn collect_store(&self, kind: EntityKind) -> Result<Vec<serde_json::Value>> {
        let mut entities = Vec::new();
        for id in self.entity_ids(kind).await? {
            if let Some(data) = self.load(kind, &id, LoadOptions::default()).await? {
                entities.push(data);
            }
        }
        Ok(entities)
    }

    async fn append_history(
        &self,
        kind: EntityKind,
        id: &str,
        data: &serde_json::Value,
        checksum: &str,
    ) -> Result<()> {
        let mut existing = self.version_history(kind, id).await?;

        // No-op detection: an identical payload does not append a new entry.
        if existing
            .first()
            .is_some_and(|latest| latest.checksum == checksum)
        {
            return Ok(());
        }

        let record = VersionRecord {
            id: Uuid::new_v4().to_string(),
            entity_id: history_key(kind, id),
            timestamp: Utc::now(),
            version: self.config.schema_version.clone(),
            checksum: checksum.to_string(),
            data: data.clone(),
        };
        let payload = serde_json::to_string(&record)?;
        self.structured.put(HISTORY_STORE, &record.id, payload).await?;

        // Evict oldest entries beyond the configured depth.
        existing.insert(0, record);
        while existing.len() > self.config.max_version_history {
            if let Some(oldest) = existing.pop() {
                self.structured.delete(HISTORY_STORE, &oldest.id).await?;
            }
        }
        Ok(())
    }
}

fn history_key(kind: EntityKind, id: &str) -> String {
    format!("{kind}:{id}")
}

async fn probe_tier(tier: &dyn StorageTier) -> TierProbe {
    let name = tier.tier_name();
    let probe_id = format!("probe-{}", Uuid::new_v4());
    let payload = format!("{{\"probe\":\"{probe_id}\"}}");

    let result = async {
        tier.write("meta", &probe_id, payload.clone()).await?;
        let read_back = tier.read("meta", &probe_id).await?;
        tier.remove("meta", &probe_id).await?;
        if read_back.as_deref() == Some(payload.as_str()) {
            Ok(())
        } else {
            Err(Error::Storage {
                tier: name.to_string(),
                message: "probe record did not round-trip".to_string(),
            })
        }
    }
    .await;

    match result {
        Ok(()) => TierProbe {
            tier: name,
            ok: true,
            message: None,
        },
        Err(error) => TierProbe {
            tier: name,
            ok: false,
            message: Some(error.to_string()),
        },
    }
}
