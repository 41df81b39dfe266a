//! Experiment Store - durable storage for experiment records
//!
//! Three write paths with different guarantees:
//!
//! - `update_metadata`: idempotent overwrite, safe to retry
//! - `replace_metrics`: full-ledger overwrite, safe to retry
//! - `append_checkpoint`: append-only, an entry is never replaced

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use super::{CheckpointEntry, ExperimentRecord, RecordMetadata};
use crate::result::MetricLedger;
use crate::{Error, Result};

/// Storage contract for experiment records.
pub trait ExperimentStore {
    /// Persist a new record and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` or `Error::Io` if the record cannot be
    /// written.
    fn create(&self, record: &ExperimentRecord) -> Result<String>;

    /// Overwrite the metadata fields of record `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if `id` is unknown or the write fails.
    fn update_metadata(&self, id: &str, metadata: &RecordMetadata) -> Result<()>;

    /// Replace the metrics ledger of record `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if `id` is unknown or the write fails.
    fn replace_metrics(&self, id: &str, metrics: &MetricLedger) -> Result<()>;

    /// Append `entry` to the checkpoint history of record `id`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Persistence` if `id` is unknown or the write fails.
    fn append_checkpoint(&self, id: &str, entry: &CheckpointEntry) -> Result<()>;

    /// Load record `id`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io`/`Error::Serialization` if the stored record is
    /// unreadable.
    fn load(&self, id: &str) -> Result<Option<ExperimentRecord>>;
}

impl<T: ExperimentStore + ?Sized> ExperimentStore for &T {
    fn create(&self, record: &ExperimentRecord) -> Result<String> {
        (**self).create(record)
    }

    fn update_metadata(&self, id: &str, metadata: &RecordMetadata) -> Result<()> {
        (**self).update_metadata(id, metadata)
    }

    fn replace_metrics(&self, id: &str, metrics: &MetricLedger) -> Result<()> {
        (**self).replace_metrics(id, metrics)
    }

    fn append_checkpoint(&self, id: &str, entry: &CheckpointEntry) -> Result<()> {
        (**self).append_checkpoint(id, entry)
    }

    fn load(&self, id: &str) -> Result<Option<ExperimentRecord>> {
        (**self).load(id)
    }
}

impl<T: ExperimentStore + ?Sized> ExperimentStore for Arc<T> {
    fn create(&self, record: &ExperimentRecord) -> Result<String> {
        (**self).create(record)
    }

    fn update_metadata(&self, id: &str, metadata: &RecordMetadata) -> Result<()> {
        (**self).update_metadata(id, metadata)
    }

    fn replace_metrics(&self, id: &str, metrics: &MetricLedger) -> Result<()> {
        (**self).replace_metrics(id, metrics)
    }

    fn append_checkpoint(&self, id: &str, entry: &CheckpointEntry) -> Result<()> {
        (**self).append_checkpoint(id, entry)
    }

    fn load(&self, id: &str) -> Result<Option<ExperimentRecord>> {
        (**self).load(id)
    }
}

fn unknown(id: &str) -> Error {
    Error::Persistence(format!("unknown experiment id {id:?}"))
}

/// In-memory experiment store backed by `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryExperimentStore {
    records: DashMap<String, ExperimentRecord>,
    next_id: AtomicU64,
}

impl MemoryExperimentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut ExperimentRecord)) -> Result<()> {
        let mut record = self.records.get_mut(id).ok_or_else(|| unknown(id))?;
        f(&mut record);
        Ok(())
    }
}

impl ExperimentStore for MemoryExperimentStore {
    fn create(&self, record: &ExperimentRecord) -> Result<String> {
        let id = format!("exp-{:06}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.records
            .insert(id.clone(), record.clone().with_id(id.clone()));
        Ok(id)
    }

    fn update_metadata(&self, id: &str, metadata: &RecordMetadata) -> Result<()> {
        self.modify(id, |r| r.set_metadata(metadata.clone()))
    }

    fn replace_metrics(&self, id: &str, metrics: &MetricLedger) -> Result<()> {
        self.modify(id, |r| r.set_metrics(metrics.clone()))
    }

    fn append_checkpoint(&self, id: &str, entry: &CheckpointEntry) -> Result<()> {
        self.modify(id, |r| r.push_checkpoint(entry.clone()))
    }

    fn load(&self, id: &str) -> Result<Option<ExperimentRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }
}

/// Filesystem experiment store: one JSON document per experiment.
///
/// Every write goes to a temporary file that is then renamed over the
/// document, so a crash never leaves a half-written record.
#[derive(Debug)]
pub struct FsExperimentStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl FsExperimentStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    fn write(&self, record: &ExperimentRecord, id: &str) -> Result<()> {
        let path = self.path_of(id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut ExperimentRecord)) -> Result<()> {
        let mut record = self.load(id)?.ok_or_else(|| unknown(id))?;
        f(&mut record);
        self.write(&record, id)
    }
}

impl ExperimentStore for FsExperimentStore {
    fn create(&self, record: &ExperimentRecord) -> Result<String> {
        let id = format!(
            "exp-{}-{:04}",
            Utc::now().format("%Y%m%dT%H%M%S%6f"),
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        if self.path_of(&id).exists() {
            return Err(Error::Persistence(format!("experiment {id} already exists")));
        }
        self.write(&record.clone().with_id(id.clone()), &id)?;
        Ok(id)
    }

    fn update_metadata(&self, id: &str, metadata: &RecordMetadata) -> Result<()> {
        self.modify(id, |r| r.set_metadata(metadata.clone()))
    }

    fn replace_metrics(&self, id: &str, metrics: &MetricLedger) -> Result<()> {
        self.modify(id, |r| r.set_metrics(metrics.clone()))
    }

    fn append_checkpoint(&self, id: &str, entry: &CheckpointEntry) -> Result<()> {
        self.modify(id, |r| r.push_checkpoint(entry.clone()))
    }

    fn load(&self, id: &str) -> Result<Option<ExperimentRecord>> {
        let path = self.path_of(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
