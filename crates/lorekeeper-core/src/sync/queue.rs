//! Persisted offline mutation queue.
//!
//! Queue items live in the structured store's `sync_queue` table so pending
//! mutations survive a restart. The queue holds at most one pending mutation
//! per (entity kind, entity id); enqueuing supersedes any older entry for the
//! same entity.

use crate::error::{Error, Result};
use crate::models::{EntityKind, SyncItem};
use crate::store::{IndexFilter, StructuredStore};

const QUEUE_STORE: &str = "sync_queue";

/// Handle to the persisted sync queue. Mutated only by the sync manager and
/// the persistence manager's offline path.
#[derive(Clone)]
pub struct SyncQueue {
    store: StructuredStore,
    byte_limit: usize,
}

impl SyncQueue {
    /// Create a queue over the given structured store.
    pub fn new(store: StructuredStore, byte_limit: usize) -> Self {
        Self { store, byte_limit }
    }

    /// Enqueue a mutation, superseding any queued mutation for the same
    /// entity. Fails with `QuotaExceeded` when the offline byte budget would
    /// be exceeded after superseding.
    pub async fn enqueue(&self, item: SyncItem) -> Result<()> {
        let superseded = self
            .items_for_entity(item.entity_type, &item.entity_id)
            .await?;
        // The budget is measured against the queue as it will look once the
        // superseded entries are gone, so a near-full queue still accepts
        // replacements for entities it already holds.
        let mut queued_bytes = self.queued_bytes().await?;
        for existing in &superseded {
            queued_bytes = queued_bytes.saturating_sub(serde_json::to_string(existing)?.len());
        }
        let payload = serde_json::to_string(&item)?;
        if queued_bytes + payload.len() > self.byte_limit {
            return Err(Error::QuotaExceeded(format!(
                "offline queue at {queued_bytes} bytes, limit {}",
                self.byte_limit
            )));
        }

        for existing in superseded {
            self.store.delete(QUEUE_STORE, &existing.id).await?;
            tracing::debug!(
                "Superseded queued {:?} for {}/{}",
                existing.action,
                existing.entity_type,
                existing.entity_id
            );
        }

        self.store.put(QUEUE_STORE, &item.id, payload).await
    }

    /// All pending items, highest priority first, oldest first within a
    /// priority band.
    pub async fn pending(&self) -> Result<Vec<SyncItem>> {
        let mut items = Vec::new();
        for id in self.store.keys(QUEUE_STORE).await? {
            if let Some(payload) = self.store.get(QUEUE_STORE, &id).await? {
                match serde_json::from_str::<SyncItem>(&payload) {
                    Ok(item) => items.push(item),
                    Err(error) => {
                        tracing::warn!("Dropping unreadable queue entry {id}: {error}");
                    }
                }
            }
        }
        items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        Ok(items)
    }

    /// Pending mutations for one entity.
    pub async fn items_for_entity(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<SyncItem>> {
        let rows = self
            .store
            .query(
                QUEUE_STORE,
                &IndexFilter::Equals {
                    index: "entity_id".to_string(),
                    value: entity_id.to_string(),
                },
            )
            .await?;
        let mut items = Vec::new();
        for (_, payload) in rows {
            if let Ok(item) = serde_json::from_str::<SyncItem>(&payload) {
                if item.entity_type == entity_type {
                    items.push(item);
                }
            }
        }
        Ok(items)
    }

    /// Persist retry bookkeeping for an item.
    pub async fn update(&self, item: &SyncItem) -> Result<()> {
        let payload = serde_json::to_string(item)?;
        self.store.put(QUEUE_STORE, &item.id, payload).await
    }

    /// Remove a delivered or permanently failed item.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.store.delete(QUEUE_STORE, id).await
    }

    /// Number of pending items.
    pub async fn len(&self) -> Result<u64> {
        self.store.count(QUEUE_STORE).await
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Drop every queued item.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear(QUEUE_STORE).await
    }

    async fn queued_bytes(&self) -> Result<usize> {
        let stats = self.store.store_stats().await?;
        Ok(stats
            .iter()
            .find(|store| store.name == QUEUE_STORE)
            .map(|store| usize::try_from(store.payload_bytes).unwrap_or(usize::MAX))
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncAction, SyncPriority};
    use crate::store::default_schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> SyncQueue {
        let store = StructuredStore::open_in_memory(default_schema(), 1024 * 1024)
            .await
            .unwrap();
        SyncQueue::new(store, 1024 * 1024)
    }

    fn item(entity_id: &str, action: SyncAction) -> SyncItem {
        SyncItem::new(
            EntityKind::Campaign,
            entity_id,
            action,
            json!({"title": entity_id}),
            "1.2.0",
            "checksum",
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_and_drain() {
        let queue = setup().await;
        queue.enqueue(item("c1", SyncAction::Create)).await.unwrap();
        queue.enqueue(item("c2", SyncAction::Create)).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_suppression_keeps_latest() {
        let queue = setup().await;
        queue.enqueue(item("c1", SyncAction::Create)).await.unwrap();
        let update = SyncItem::new(
            EntityKind::Campaign,
            "c1",
            SyncAction::Update,
            json!({"title": "latest"}),
            "1.2.0",
            "checksum2",
        );
        queue.enqueue(update).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
        let pending = queue.pending().await.unwrap();
        assert_eq!(pending[0].action, SyncAction::Update);
        assert_eq!(pending[0].data, json!({"title": "latest"}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn different_kinds_do_not_collide() {
        let queue = setup().await;
        queue.enqueue(item("x1", SyncAction::Create)).await.unwrap();
        let character = SyncItem::new(
            EntityKind::Character,
            "x1",
            SyncAction::Create,
            json!({"name": "Tharn"}),
            "1.2.0",
            "checksum",
        );
        queue.enqueue(character).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_orders_by_priority_then_age() {
        let queue = setup().await;
        queue
            .enqueue(item("low", SyncAction::Create).with_priority(SyncPriority::Low))
            .await
            .unwrap();
        queue
            .enqueue(item("high", SyncAction::Create).with_priority(SyncPriority::High))
            .await
            .unwrap();
        queue
            .enqueue(item("normal-1", SyncAction::Create))
            .await
            .unwrap();
        queue
            .enqueue(item("normal-2", SyncAction::Create))
            .await
            .unwrap();

        let pending = queue.pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|i| i.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn byte_limit_rejects_when_spent() {
        let store = StructuredStore::open_in_memory(default_schema(), 1024)
            .await
            .unwrap();
        let queue = SyncQueue::new(store, 200);
        queue.enqueue(item("c1", SyncAction::Create)).await.ok();
        let error = queue.enqueue(item("c2", SyncAction::Create)).await;
        assert!(matches!(error, Err(Error::QuotaExceeded(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn superseding_near_the_limit_stays_within_budget() {
        let store = StructuredStore::open_in_memory(default_schema(), 1024)
            .await
            .unwrap();
        let first = item("c1", SyncAction::Create);
        let budget = serde_json::to_string(&first).unwrap().len() + 8;
        let queue = SyncQueue::new(store, budget);
        queue.enqueue(first).await.unwrap();

        // Replacing the queued entry does not count its bytes twice.
        let update = SyncItem::new(
            EntityKind::Campaign,
            "c1",
            SyncAction::Update,
            json!({"title": "v2"}),
            "1.2.0",
            "checksum2",
        );
        queue.enqueue(update).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.pending().await.unwrap()[0].action, SyncAction::Update);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_deletes_item() {
        let queue = setup().await;
        let queued = item("c1", SyncAction::Create);
        let id = queued.id.clone();
        queue.enqueue(queued).await.unwrap();
        queue.remove(&id).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }
}
