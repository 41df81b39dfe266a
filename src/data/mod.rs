//! Dataset access: identifier stores, partitioning, preprocessing and batching
//!
//! ```text
//! DataStore ──ids──> DatasetPartitioner ──window──> fetch (order restored)
//!                                                      │
//!                                 ProcessorChain <─────┘
//!                                      │
//!                             Batch { inputs, labels } ──> BatchSource (DataReader)
//! ```

mod partitioner;
mod processor;
mod reader;
mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use partitioner::{BatchWindow, DatasetPartitioner, PartitionerState, Partitions};
pub use processor::{PipedParams, ProcessedSample, Processor, ProcessorChain, SampleState};
pub use reader::DataReader;
pub use store::{DataStore, ListQuery, MemoryDataStore, SortOrder, SortSpec};

/// Named execution context for batching and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Training partition
    #[serde(rename = "training")]
    Train,
    /// Validation partition
    #[serde(rename = "validation")]
    Validation,
    /// Test partition
    #[serde(rename = "test")]
    Test,
}

impl Phase {
    /// All phases in ledger order.
    pub const ALL: [Self; 3] = [Self::Train, Self::Validation, Self::Test];

    /// Ledger key (`training`, `validation`, `test`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "training",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Train => 0,
            Self::Validation => 1,
            Self::Test => 2,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" | "training" => Ok(Self::Train),
            "validation" => Ok(Self::Validation),
            "test" => Ok(Self::Test),
            other => Err(Error::Validation(format!(
                "phase must be one of training, validation, test (got {other:?})"
            ))),
        }
    }
}

/// Processed samples ready for the model backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<X, Y> {
    /// Input features, one per sample
    pub inputs: Vec<X>,
    /// Labels, aligned with `inputs`
    pub labels: Vec<Y>,
}

impl<X, Y> Batch<X, Y> {
    /// Create an empty batch with room for `capacity` samples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inputs: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    /// Append one sample.
    pub fn push(&mut self, sample: ProcessedSample<X, Y>) {
        self.inputs.push(sample.input);
        self.labels.push(sample.label);
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the batch has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

impl<X, Y> Default for Batch<X, Y> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// A batch plus the end-of-pass flag for its phase.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBatch<X, Y> {
    /// The processed samples
    pub batch: Batch<X, Y>,
    /// Last batch of the epoch (train) or of the pass (validation/test)
    pub is_final: bool,
}

/// Source of processed batches driven by the trainer.
pub trait BatchSource {
    /// Backend input type
    type Input;
    /// Backend label type
    type Label;

    /// Next batch for `phase`.
    ///
    /// # Errors
    ///
    /// Propagates data-fetch and processing failures.
    fn next_batch(&mut self, phase: Phase) -> Result<LoadedBatch<Self::Input, Self::Label>>;

    /// Rewind all phase cursors (and reshuffle train, if enabled).
    fn reset_epoch(&mut self);

    /// Train batches per epoch (at least 1).
    fn batches_per_epoch(&self) -> usize;
}
