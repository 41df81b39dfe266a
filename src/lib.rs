//! # Trueno-Train: Deterministic Training Orchestration
//!
//! **Version**: 0.1.0
//!
//! Trueno-Train partitions a labeled dataset, streams it in deterministic,
//! resumable batches through a composable preprocessing chain, drives a
//! synchronous train/validate/test loop against an external model backend,
//! and incrementally persists experiment state (metrics ledger and periodic
//! checkpoints) to durable storage.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: Every failure stops the line; backend and fetch errors are never retried silently
//! - **Poka-Yoke safety**: Batch order is restored against the request list, whatever the store returns
//! - **Genchi Genbutsu**: Append-only metric ledgers and checkpoint history, never rewritten
//! - **Heijunka**: Single-threaded, synchronous loop with no hidden prefetch
//!
//! ## Data Flow
//!
//! ```text
//! DataStore ──> DatasetPartitioner ──> ProcessorChain ──> Trainer ──> TrainingResult
//!                                                            │
//!                                                            └──> Callback (ExperimentRecorder) ──> ExperimentStore / BlobStore
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_train::config::PartitionConfig;
//! use trueno_train::data::{DatasetPartitioner, MemoryDataStore, Phase};
//!
//! let store = MemoryDataStore::from_records((0u64..100).map(|i| (i, serde_json::json!({"x": i}))));
//! let mut partitioner = DatasetPartitioner::new(store, PartitionConfig::default())?;
//!
//! let window = partitioner.next_batch(Phase::Train);
//! println!("{} ids, final = {}", window.ids.len(), window.is_final);
//! # Ok::<(), trueno_train::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod callback;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod result;
pub mod trainer;

pub use error::{Error, Result};
