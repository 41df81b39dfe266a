//! Experiment Record - root entity for experiment tracking

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CheckpointEntry;
use crate::result::{MetricLedger, TrainingResult};

/// Lifecycle status of an experiment.
///
/// ```text
/// Created ──> Training ──> TrainingComplete ──> Testing ──> TestComplete
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Persisted, training not started.
    #[default]
    Created,
    /// Training in progress.
    Training,
    /// All epochs finished.
    TrainingComplete,
    /// Test pass in progress.
    Testing,
    /// Test pass finished.
    TestComplete,
}

impl ExperimentStatus {
    /// Status name as persisted.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Training => "training",
            Self::TrainingComplete => "training_complete",
            Self::Testing => "testing",
            Self::TestComplete => "test_complete",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overwritable metadata of an experiment (last write wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Lifecycle status
    pub status: ExperimentStatus,
    /// Where the run's log is written, if anywhere
    pub log_location: Option<String>,
    /// Current epoch (`-1` before training)
    pub current_epoch: i64,
    /// Current batch within the epoch
    pub current_batch: u64,
    /// Train batches per epoch, once known
    pub max_batches_per_epoch: Option<usize>,
    /// Configured epochs, once known
    pub max_epochs: Option<usize>,
}

impl RecordMetadata {
    /// Metadata reflecting `result` with the given status.
    #[must_use]
    pub fn from_result(
        status: ExperimentStatus,
        log_location: Option<String>,
        result: &TrainingResult,
    ) -> Self {
        Self {
            status,
            log_location,
            current_epoch: result.current_epoch(),
            current_batch: result.current_batch(),
            max_batches_per_epoch: result.max_batches_per_epoch(),
            max_epochs: result.max_epochs(),
        }
    }
}

/// Persisted record of one training run.
///
/// Metadata is overwritten on every lifecycle event, the metrics ledger is
/// replaced wholesale, and the checkpoint history only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    id: Option<String>,
    name: String,
    architecture: serde_json::Value,
    #[serde(flatten)]
    metadata: RecordMetadata,
    metrics: MetricLedger,
    checkpoints: Vec<CheckpointEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Create an unsaved record with status `Created`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ExperimentRecordBuilder::new(name).build()
    }

    /// Create a builder for constructing a record with optional fields.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(name)
    }

    /// Return the record with its store-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Store-assigned id, once persisted.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque architecture descriptor.
    #[must_use]
    pub const fn architecture(&self) -> &serde_json::Value {
        &self.architecture
    }

    /// Overwritable metadata.
    #[must_use]
    pub const fn metadata(&self) -> &RecordMetadata {
        &self.metadata
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.metadata.status
    }

    /// Metrics ledger as last persisted.
    #[must_use]
    pub const fn metrics(&self) -> &MetricLedger {
        &self.metrics
    }

    /// Checkpoint history, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> &[CheckpointEntry] {
        &self.checkpoints
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Timestamp of the last mutation.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Overwrite the metadata.
    pub fn set_metadata(&mut self, metadata: RecordMetadata) {
        self.metadata = metadata;
        self.updated_at = Utc::now();
    }

    /// Replace the whole metrics ledger.
    pub fn set_metrics(&mut self, metrics: MetricLedger) {
        self.metrics = metrics;
        self.updated_at = Utc::now();
    }

    /// Append a checkpoint to the history.
    pub fn push_checkpoint(&mut self, entry: CheckpointEntry) {
        self.checkpoints.push(entry);
        self.updated_at = Utc::now();
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    name: String,
    architecture: serde_json::Value,
    log_location: Option<String>,
    created_at: DateTime<Utc>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            architecture: serde_json::Value::Null,
            log_location: None,
            created_at: Utc::now(),
        }
    }

    /// Set the architecture descriptor.
    #[must_use]
    pub fn architecture(mut self, architecture: serde_json::Value) -> Self {
        self.architecture = architecture;
        self
    }

    /// Set the log location.
    #[must_use]
    pub fn log_location(mut self, location: impl Into<String>) -> Self {
        self.log_location = Some(location.into());
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        let result = TrainingResult::new();
        ExperimentRecord {
            id: None,
            name: self.name,
            architecture: self.architecture,
            metadata: RecordMetadata::from_result(
                ExperimentStatus::Created,
                self.log_location,
                &result,
            ),
            metrics: MetricLedger::default(),
            checkpoints: Vec::new(),
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
