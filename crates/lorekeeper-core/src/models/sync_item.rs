//! Offline sync queue and conflict models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityKind;

/// Mutation kind carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// Delivery priority. Higher priorities drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// A pending mutation waiting to be delivered to the remote endpoint.
///
/// Created when a save happens offline (or is explicitly queued), retried on
/// failure, and removed on success or after exhausting `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Queue item id
    pub id: String,
    /// Entity kind
    pub entity_type: EntityKind,
    /// Entity id the mutation applies to
    pub entity_id: String,
    /// Mutation kind
    pub action: SyncAction,
    /// Serialized entity payload (empty object for deletes)
    pub data: serde_json::Value,
    /// When the mutation was queued
    pub timestamp: DateTime<Utc>,
    /// Schema version the payload was written under
    pub version: String,
    /// SHA-256 hex digest of the payload
    pub checksum: String,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Delivery priority
    #[serde(default)]
    pub priority: SyncPriority,
    /// Last delivery error, if any
    #[serde(default)]
    pub last_error: Option<String>,
}

impl SyncItem {
    /// Create a queue item for the given mutation.
    pub fn new(
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        action: SyncAction,
        data: serde_json::Value,
        version: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            action,
            data,
            timestamp: Utc::now(),
            version: version.into(),
            checksum: checksum.into(),
            retry_count: 0,
            priority: SyncPriority::default(),
            last_error: None,
        }
    }

    /// Set the delivery priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: SyncPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Conflict classification reported by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    UpdateConflict,
    DeleteConflict,
    CreateConflict,
}

impl ConflictType {
    /// Classify a rejected action.
    pub const fn from_action(action: SyncAction) -> Self {
        match action {
            SyncAction::Create => Self::CreateConflict,
            SyncAction::Update => Self::UpdateConflict,
            SyncAction::Delete => Self::DeleteConflict,
        }
    }
}

/// A sync attempt the remote rejected as stale.
///
/// Both sides' data is preserved; conflicts are never dropped silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Conflict id (shares the queue item's id)
    pub id: String,
    /// Entity kind
    pub entity_type: EntityKind,
    /// Entity id under conflict
    pub entity_id: String,
    /// Local payload that was rejected
    pub local_data: serde_json::Value,
    /// Remote representation returned with the rejection
    pub remote_data: serde_json::Value,
    /// Local payload timestamp
    pub local_timestamp: DateTime<Utc>,
    /// Remote representation timestamp
    pub remote_timestamp: DateTime<Utc>,
    /// Conflict classification
    pub conflict_type: ConflictType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn priority_orders_low_to_high() {
        assert!(SyncPriority::High > SyncPriority::Normal);
        assert!(SyncPriority::Normal > SyncPriority::Low);
    }

    #[test]
    fn conflict_type_tracks_action() {
        assert_eq!(
            ConflictType::from_action(SyncAction::Update),
            ConflictType::UpdateConflict
        );
        assert_eq!(
            ConflictType::from_action(SyncAction::Delete),
            ConflictType::DeleteConflict
        );
    }

    #[test]
    fn sync_item_serializes_action_lowercase() {
        let item = SyncItem::new(
            EntityKind::Campaign,
            "c1",
            SyncAction::Create,
            serde_json::json!({"title": "Test"}),
            "1.2.0",
            "ab",
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["action"], "create");
        assert_eq!(json["priority"], "normal");
        assert_eq!(json["retry_count"], 0);
    }
}
