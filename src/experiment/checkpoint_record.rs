//! Checkpoint Record - one entry of the append-only checkpoint history

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque reference returned by a [`BlobStore`](super::BlobStore).
///
/// Built-in stores use the content-addressed format
/// `algorithm:hex_digest-length` (e.g. `fxhash:00c0ffee00c0ffee-4096`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wrap a store-specific reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Reference as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A serialized model snapshot plus the coordinates it was taken at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointEntry {
    blob_ref: BlobRef,
    epoch: i64,
    batch: u64,
    created_at: DateTime<Utc>,
}

impl CheckpointEntry {
    /// Create an entry stamped with the current time.
    #[must_use]
    pub fn new(blob_ref: BlobRef, epoch: i64, batch: u64) -> Self {
        Self {
            blob_ref,
            epoch,
            batch,
            created_at: Utc::now(),
        }
    }

    /// Reference to the stored snapshot.
    #[must_use]
    pub const fn blob_ref(&self) -> &BlobRef {
        &self.blob_ref
    }

    /// Epoch of the snapshot (`-1` = untrained).
    #[must_use]
    pub const fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Batch of the snapshot.
    #[must_use]
    pub const fn batch(&self) -> u64 {
        self.batch
    }

    /// When the entry was appended.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_entry_new() {
        let entry = CheckpointEntry::new(BlobRef::new("fxhash:abc-3"), 2, 7);
        assert_eq!(entry.blob_ref().as_str(), "fxhash:abc-3");
        assert_eq!(entry.epoch(), 2);
        assert_eq!(entry.batch(), 7);
    }

    #[test]
    fn test_blob_ref_serializes_as_plain_string() {
        let json = serde_json::to_value(BlobRef::new("fxhash:abc-3")).unwrap();
        assert_eq!(json, serde_json::json!("fxhash:abc-3"));
    }
}
