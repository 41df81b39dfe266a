//! Experiment Tracking
//!
//! Durable record of one training run: overwritable metadata, a fully
//! replaced metrics ledger, and an append-only checkpoint history whose
//! snapshots live in a [`BlobStore`].
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord
//!   ├── RecordMetadata            [overwrite, last write wins]
//!   ├── MetricLedger              [full replace]
//!   └──< CheckpointEntry (N)      [append-only] ──> BlobStore (BlobRef)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_train::config::RecorderConfig;
//! use trueno_train::experiment::{ExperimentRecorder, ExperimentStatus, MemoryBlobStore, MemoryExperimentStore};
//! use trueno_train::logging::LogContext;
//!
//! let recorder = ExperimentRecorder::new(
//!     MemoryExperimentStore::new(),
//!     MemoryBlobStore::new(),
//!     serde_json::json!({"layers": [784, 10]}),
//!     &RecorderConfig::named("mnist"),
//!     &LogContext::new("mnist"),
//! )?;
//!
//! let record = recorder.record()?.expect("persisted on construction");
//! assert_eq!(record.status(), ExperimentStatus::Created);
//! # Ok::<(), trueno_train::Error>(())
//! ```

mod blob;
mod checkpoint_record;
#[cfg(feature = "compression")]
mod compressed;
mod experiment_record;
mod recorder;
mod store;

pub use blob::{content_ref, BlobStore, FsBlobStore, MemoryBlobStore};
pub use checkpoint_record::{BlobRef, CheckpointEntry};
#[cfg(feature = "compression")]
pub use compressed::{CompressedBlobStore, Compression};
pub use experiment_record::{
    ExperimentRecord, ExperimentRecordBuilder, ExperimentStatus, RecordMetadata,
};
pub use recorder::{CheckpointPredicate, ExperimentRecorder};
pub use store::{ExperimentStore, FsExperimentStore, MemoryExperimentStore};
