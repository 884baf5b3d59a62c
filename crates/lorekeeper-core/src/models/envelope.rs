//! Storage envelope wrapping every persisted value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope recorded around any persisted payload.
///
/// `checksum` is the SHA-256 hex digest of the serialized, uncompressed
/// payload; it must verify against `data` before any compression transform.
/// A mismatch signals corruption of the stored bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem<T> {
    /// Entity id
    pub id: String,
    /// The wrapped payload
    pub data: T,
    /// Creation/update time
    pub timestamp: DateTime<Utc>,
    /// Schema-version tag the payload was written under
    pub version: String,
    /// Byte length of the serialized payload
    pub size: usize,
    /// Whether `data` was stored compressed
    #[serde(default)]
    pub is_compressed: bool,
    /// True when the write happened while disconnected
    #[serde(default)]
    pub is_offline: bool,
    /// SHA-256 hex digest of the serialized, uncompressed payload
    pub checksum: String,
}

impl<T> StorageItem<T> {
    /// Wrap a payload with the given metadata.
    pub fn new(
        id: impl Into<String>,
        data: T,
        version: impl Into<String>,
        size: usize,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            data,
            timestamp: Utc::now(),
            version: version.into(),
            size,
            is_compressed: false,
            is_offline: false,
            checksum: checksum.into(),
        }
    }

    /// Map the payload while keeping the envelope metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StorageItem<U> {
        StorageItem {
            id: self.id,
            data: f(self.data),
            timestamp: self.timestamp,
            version: self.version,
            size: self.size,
            is_compressed: self.is_compressed,
            is_offline: self.is_offline,
            checksum: self.checksum,
        }
    }
}
