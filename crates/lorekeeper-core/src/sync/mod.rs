//! Offline queue draining, conflict handling, and connectivity tracking.

mod conflict;
mod queue;
mod remote;
mod status;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ConflictStrategy;
use crate::error::{Error, Result};
use crate::models::{ConflictItem, ConflictType, SyncAction, SyncItem, SyncPriority};
use crate::persistence::{PersistenceManager, SaveOptions};

pub use conflict::{decide, ConflictDecision, ConflictLog, ConflictResolution};
pub use queue::SyncQueue;
pub use remote::{HttpRemote, PushOutcome, RemoteEndpoint};
pub use status::ConnectionStatus;

/// Snapshot of the sync subsystem for the UI and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub in_progress: bool,
    pub pending_items: u64,
    pub pending_conflicts: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Outcome of one queue-draining pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Items the remote accepted
    pub delivered: u64,
    /// Items dropped after exhausting retries
    pub failed: u64,
    /// Items the remote rejected as conflicts
    pub conflicts: u64,
    /// Conflicts auto-resolved by the configured strategy
    pub resolved: u64,
    /// Whether the pass was skipped (offline or already running)
    pub skipped: bool,
}

/// Drains the offline queue into the remote endpoint and keeps the conflict
/// log. All entity reads and writes go through the persistence manager; the
/// sync manager never touches storage tiers directly.
#[derive(Clone)]
pub struct SyncManager {
    persistence: PersistenceManager,
    conflicts: ConflictLog,
    remote: Arc<dyn RemoteEndpoint>,
    in_progress: Arc<AtomicBool>,
    last_sync: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl SyncManager {
    /// Wire the manager over the persistence layer and a remote endpoint.
    pub fn new(
        persistence: PersistenceManager,
        conflicts: ConflictLog,
        remote: Arc<dyn RemoteEndpoint>,
    ) -> Self {
        Self {
            persistence,
            conflicts,
            remote,
            in_progress: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// The conflict log, for UIs listing unresolved conflicts.
    pub const fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    /// Current subsystem snapshot.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            online: self.persistence.status().is_online(),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            pending_items: self.persistence.queue().len().await?,
            pending_conflicts: self.conflicts.len().await?,
            last_sync: *self
                .last_sync
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        })
    }

    /// Flip connectivity. Coming back online triggers a queue-draining pass.
    pub async fn set_online(&self, online: bool) -> Result<SyncReport> {
        let changed = self.persistence.status().set_online(online);
        if changed && online {
            tracing::info!("Connection restored, draining offline queue");
            return self.run_sync_pass().await;
        }
        Ok(SyncReport {
            skipped: true,
            ..SyncReport::default()
        })
    }

    /// Drain the queue in priority order, batch by batch.
    ///
    /// Each pending item is attempted once per pass; transient failures stay
    /// queued with their retry count bumped and are dropped after
    /// `max_retries` attempts. Conflicts are logged, then auto-resolved at
    /// the end of the pass under the configured strategy.
    pub async fn run_sync_pass(&self) -> Result<SyncReport> {
        if !self.persistence.status().is_online() {
            tracing::debug!("Skipping sync pass while offline");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync pass already running");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }

        let result = self.drain_queue().await;
        self.in_progress.store(false, Ordering::SeqCst);

        let mut report = result?;
        report.resolved = self.auto_resolve_conflicts().await?;
        *self
            .last_sync
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Utc::now());
        tracing::info!(
            "Sync pass finished: {} delivered, {} conflicts, {} failed",
            report.delivered,
            report.conflicts,
            report.failed
        );
        Ok(report)
    }

    /// Spawn a task that runs a sync pass on the configured interval.
    ///
    /// Passes while offline are no-ops. Abort the returned handle to stop.
    pub fn start_auto_sync(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval =
            std::time::Duration::from_secs(manager.persistence.config().sync_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = manager.run_sync_pass().await {
                    tracing::warn!("Scheduled sync pass failed: {error}");
                }
            }
        })
    }

    async fn drain_queue(&self) -> Result<SyncReport> {
        let config = self.persistence.config();
        let queue = self.persistence.queue();
        let mut report = SyncReport::default();

        let pending = queue.pending().await?;
        for (index, batch) in pending.chunks(config.batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(config.batch_delay()).await;
            }
            for item in batch {
                match self.remote.push(item).await {
                    Ok(PushOutcome::Accepted) => {
                        queue.remove(&item.id).await?;
                        report.delivered += 1;
                    }
                    Ok(PushOutcome::Conflict {
                        remote_data,
                        remote_timestamp,
                    }) => {
                        let conflict = ConflictItem {
                            id: item.id.clone(),
                            entity_type: item.entity_type,
                            entity_id: item.entity_id.clone(),
                            local_data: item.data.clone(),
                            remote_data,
                            local_timestamp: item.timestamp,
                            remote_timestamp,
                            conflict_type: ConflictType::from_action(item.action),
                        };
                        self.conflicts.record(&conflict).await?;
                        queue.remove(&item.id).await?;
                        report.conflicts += 1;
                    }
                    Err(error) => {
                        let mut item = item.clone();
                        item.retry_count += 1;
                        item.last_error = Some(error.to_string());
                        if item.retry_count >= config.max_retries {
                            tracing::warn!(
                                "Dropping {}/{} after {} failed deliveries: {error}",
                                item.entity_type,
                                item.entity_id,
                                item.retry_count
                            );
                            queue.remove(&item.id).await?;
                            report.failed += 1;
                        } else {
                            tracing::debug!(
                                "Delivery of {}/{} failed (attempt {}): {error}",
                                item.entity_type,
                                item.entity_id,
                                item.retry_count
                            );
                            queue.update(&item).await?;
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    async fn auto_resolve_conflicts(&self) -> Result<u64> {
        let strategy = self.persistence.config().conflict_strategy;
        if strategy == ConflictStrategy::Manual {
            return Ok(0);
        }
        let mut resolved = 0;
        for conflict in self.conflicts.pending().await? {
            let Some(decision) = decide(strategy, &conflict) else {
                continue;
            };
            let resolution = match decision {
                ConflictDecision::UseLocal => ConflictResolution::UseLocal,
                ConflictDecision::UseRemote => ConflictResolution::UseRemote,
            };
            self.apply_resolution(&conflict, resolution).await?;
            self.conflicts.remove(&conflict.id).await?;
            resolved += 1;
        }
        Ok(resolved)
    }

    /// Resolve one logged conflict explicitly. Used by the UI when the
    /// strategy is manual.
    pub async fn resolve_conflict(&self, id: &str, resolution: ConflictResolution) -> Result<()> {
        let conflict = self
            .conflicts
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no pending conflict {id}")))?;
        self.apply_resolution(&conflict, resolution).await?;
        self.conflicts.remove(id).await
    }

    async fn apply_resolution(
        &self,
        conflict: &ConflictItem,
        resolution: ConflictResolution,
    ) -> Result<()> {
        match resolution {
            ConflictResolution::UseRemote => {
                if conflict.remote_data.is_null() {
                    // Remote deleted the entity; mirror that locally.
                    self.persistence
                        .delete(conflict.entity_type, &conflict.entity_id, true)
                        .await?;
                } else {
                    self.persistence
                        .save(
                            conflict.entity_type,
                            &conflict.entity_id,
                            &conflict.remote_data,
                            SaveOptions {
                                skip_offline_queue: true,
                                ..SaveOptions::default()
                            },
                        )
                        .await?;
                }
            }
            ConflictResolution::UseLocal => {
                // Local wins: redeliver the original mutation, deletes
                // included, not a blanket update.
                let action = match conflict.conflict_type {
                    ConflictType::DeleteConflict => SyncAction::Delete,
                    ConflictType::CreateConflict | ConflictType::UpdateConflict => {
                        SyncAction::Update
                    }
                };
                self.requeue(conflict, action, conflict.local_data.clone())
                    .await?;
            }
            ConflictResolution::Merge(merged) => {
                self.persistence
                    .save(
                        conflict.entity_type,
                        &conflict.entity_id,
                        &merged,
                        SaveOptions {
                            skip_offline_queue: true,
                            ..SaveOptions::default()
                        },
                    )
                    .await?;
                self.requeue(conflict, SyncAction::Update, merged).await?;
            }
        }
        tracing::info!(
            "Resolved conflict on {}/{}",
            conflict.entity_type,
            conflict.entity_id
        );
        Ok(())
    }

    // Queue the winning payload for redelivery, ahead of ordinary traffic.
    async fn requeue(
        &self,
        conflict: &ConflictItem,
        action: SyncAction,
        data: serde_json::Value,
    ) -> Result<()> {
        let serialized = serde_json::to_vec(&data)?;
        let checksum = crate::codec::checksum_hex(&serialized);
        let item = SyncItem::new(
            conflict.entity_type,
            conflict.entity_id.clone(),
            action,
            data,
            self.persistence.config().schema_version.as_str(),
            checksum,
        )
        .with_priority(SyncPriority::High);
        self.persistence.queue().enqueue(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::models::EntityKind;
    use crate::persistence::LoadOptions;
    use crate::store::{default_schema, MemoryKvStore, StructuredStore};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    /// Remote double that replays a scripted outcome per call and records
    /// every delivered item.
    struct ScriptedRemote {
        script: Mutex<Vec<Result<PushOutcome>>>,
        seen: Mutex<Vec<SyncItem>>,
    }

    impl ScriptedRemote {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn scripted(outcomes: Vec<Result<PushOutcome>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn deliveries(&self) -> Vec<SyncItem> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteEndpoint for ScriptedRemote {
        async fn push(&self, item: &SyncItem) -> Result<PushOutcome> {
            self.seen.lock().unwrap().push(item.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Ok(PushOutcome::Accepted)
            } else {
                script.remove(0)
            }
        }
    }

    async fn setup(config: StoreConfig, remote: Arc<ScriptedRemote>) -> (SyncManager, PersistenceManager) {
        let structured = StructuredStore::open_in_memory(default_schema(), 1024 * 1024)
            .await
            .unwrap();
        let queue = SyncQueue::new(structured.clone(), config.offline_storage_limit);
        let status = ConnectionStatus::new(!config.offline_mode);
        let persistence = PersistenceManager::new(
            structured.clone(),
            Arc::new(MemoryKvStore::new()),
            queue,
            status,
            config,
        );
        let manager = SyncManager::new(
            persistence.clone(),
            ConflictLog::new(structured),
            remote,
        );
        (manager, persistence)
    }

    fn campaign(title: &str) -> serde_json::Value {
        json!({"id": "c1", "title": title})
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_save_drains_on_reconnect() {
        let remote = ScriptedRemote::accepting();
        let (manager, persistence) =
            setup(StoreConfig::default().offline(), Arc::clone(&remote)).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Iron Keep"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(persistence.queue().len().await.unwrap(), 1);

        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(persistence.queue().len().await.unwrap(), 0);

        let status = manager.status().await.unwrap();
        assert!(status.online);
        assert!(status.last_sync.is_some());
        assert_eq!(remote.deliveries().len(), 1);
        assert_eq!(remote.deliveries()[0].action, SyncAction::Create);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_is_skipped_while_offline() {
        let (manager, _) =
            setup(StoreConfig::default().offline(), ScriptedRemote::accepting()).await;
        let report = manager.run_sync_pass().await.unwrap();
        assert!(report.skipped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_update_logs_exactly_one_conflict() {
        let remote = ScriptedRemote::scripted(vec![Ok(PushOutcome::Conflict {
            remote_data: json!({"id": "c1", "title": "Remote"}),
            remote_timestamp: Utc::now(),
        })]);
        let config = StoreConfig::default()
            .offline()
            .with_conflict_strategy(ConflictStrategy::Manual);
        let (manager, persistence) = setup(config, remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        // Second offline save supersedes the create with an update.
        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local v2"),
                SaveOptions::default(),
            )
            .await
            .unwrap();

        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.resolved, 0);

        let pending = manager.conflicts().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].conflict_type, ConflictType::UpdateConflict);
        assert_eq!(pending[0].local_data["title"], "Local v2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timestamp_strategy_takes_newer_remote() {
        let remote = ScriptedRemote::scripted(vec![Ok(PushOutcome::Conflict {
            remote_data: json!({"id": "c1", "title": "Remote"}),
            remote_timestamp: Utc::now() + chrono::Duration::hours(1),
        })]);
        let (manager, persistence) =
            setup(StoreConfig::default().offline(), remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.resolved, 1);
        assert!(manager.conflicts().is_empty().await.unwrap());

        let loaded = persistence
            .load(EntityKind::Campaign, "c1", LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded.unwrap()["title"], "Remote");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn manual_resolution_use_local_requeues() {
        let remote = ScriptedRemote::scripted(vec![Ok(PushOutcome::Conflict {
            remote_data: json!({"id": "c1", "title": "Remote"}),
            remote_timestamp: Utc::now(),
        })]);
        let config = StoreConfig::default()
            .offline()
            .with_conflict_strategy(ConflictStrategy::Manual);
        let (manager, persistence) = setup(config, remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        manager.set_online(true).await.unwrap();

        let conflict_id = manager.conflicts().pending().await.unwrap()[0].id.clone();
        manager
            .resolve_conflict(&conflict_id, ConflictResolution::UseLocal)
            .await
            .unwrap();

        assert!(manager.conflicts().is_empty().await.unwrap());
        let pending = persistence.queue().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].priority, SyncPriority::High);
        assert_eq!(pending[0].data["title"], "Local");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_delete_wins_a_delete_conflict() {
        let remote = ScriptedRemote::scripted(vec![Ok(PushOutcome::Conflict {
            remote_data: json!({"id": "c1", "title": "Remote"}),
            remote_timestamp: Utc::now(),
        })]);
        let config = StoreConfig::default()
            .offline()
            .with_conflict_strategy(ConflictStrategy::Manual);
        let (manager, persistence) = setup(config, remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        // The offline delete supersedes the queued create.
        persistence
            .delete(EntityKind::Campaign, "c1", false)
            .await
            .unwrap();

        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.conflicts, 1);
        let conflict = manager.conflicts().pending().await.unwrap()[0].clone();
        assert_eq!(conflict.conflict_type, ConflictType::DeleteConflict);

        manager
            .resolve_conflict(&conflict.id, ConflictResolution::UseLocal)
            .await
            .unwrap();

        // Keeping the local side redelivers the delete, not an empty update.
        let pending = persistence.queue().pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, SyncAction::Delete);
        assert_eq!(pending[0].priority, SyncPriority::High);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failures_retry_until_exhausted() {
        let failure = || {
            Err(Error::Sync("connection reset".to_string()))
        };
        let remote = ScriptedRemote::scripted(vec![failure(), failure()]);
        let config = StoreConfig {
            max_retries: 2,
            offline_mode: true,
            ..StoreConfig::default()
        };
        let (manager, persistence) = setup(config, remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        persistence.status().set_online(true);

        // First pass: attempt fails, item stays queued with a bumped count.
        let report = manager.run_sync_pass().await.unwrap();
        assert_eq!(report.failed, 0);
        let pending = persistence.queue().pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.is_some());

        // Second pass exhausts the budget and drops the item.
        let report = manager.run_sync_pass().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(persistence.queue().is_empty().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_delete_resolution_removes_local_copy() {
        let remote = ScriptedRemote::scripted(vec![Ok(PushOutcome::Conflict {
            remote_data: serde_json::Value::Null,
            remote_timestamp: Utc::now() + chrono::Duration::hours(1),
        })]);
        let (manager, persistence) =
            setup(StoreConfig::default().offline(), remote).await;

        persistence
            .save(
                EntityKind::Campaign,
                "c1",
                &campaign("Local"),
                SaveOptions::default(),
            )
            .await
            .unwrap();
        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.resolved, 1);

        let loaded = persistence
            .load(EntityKind::Campaign, "c1", LoadOptions::default())
            .await
            .unwrap();
        assert_eq!(loaded, None);
    }
}
