//! Data models for Lorekeeper

mod entity;
mod envelope;
mod sync_item;

pub use entity::{
    Campaign, Character, CharacterStats, CharacterType, Entity, EntityKind, Preferences, Session,
    ThemeMode, STAT_MAX, STAT_MIN,
};
pub use envelope::StorageItem;
pub use sync_item::{ConflictItem, ConflictType, SyncAction, SyncItem, SyncPriority};
