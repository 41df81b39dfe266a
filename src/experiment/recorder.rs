//! Experiment recorder: mirrors trainer lifecycle events into durable storage
//!
//! | event            | status             | checkpoint                      |
//! |------------------|--------------------|---------------------------------|
//! | `training_start` | `Training`         | if `save_initial_snapshot`      |
//! | `batch_end`      | `Training`         | never                           |
//! | `epoch_end`      | `Training`         | if the predicate holds          |
//! | `training_end`   | `TrainingComplete` | never                           |
//! | `test_start`     | `Testing`          | never                           |
//! | `test_end`       | `TestComplete`     | never                           |
//!
//! Every event overwrites the metadata and the full metrics ledger.
//! `test_start` is rejected with `InvalidTransition` until the record is
//! `TrainingComplete`; a repeated test pass from `TestComplete` is allowed.

use tracing::{debug, info, warn};

use super::{
    BlobStore, CheckpointEntry, ExperimentRecord, ExperimentStatus, ExperimentStore,
    RecordMetadata,
};
use crate::backend::ModelSnapshot;
use crate::callback::Callback;
use crate::config::RecorderConfig;
use crate::logging::LogContext;
use crate::result::TrainingResult;
use crate::{Error, Result};

/// Decides at each epoch boundary whether to checkpoint.
pub type CheckpointPredicate = Box<dyn Fn(&TrainingResult) -> bool>;

/// Retry `op` up to `retries` extra times, logging each failure.
fn with_retries<T>(what: &str, retries: u32, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "Persistence write failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`Callback`] that persists an [`ExperimentRecord`] for one run.
pub struct ExperimentRecorder<S, B> {
    store: S,
    blobs: B,
    experiment_id: String,
    config: RecorderConfig,
    log_location: Option<String>,
    status: ExperimentStatus,
    checkpoint_when: CheckpointPredicate,
    checkpoints_saved: usize,
}

impl<S: ExperimentStore, B: BlobStore> ExperimentRecorder<S, B> {
    /// Create and persist the experiment record (status `Created`).
    ///
    /// The record is durable before this returns, so every later event can
    /// reference it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an invalid config and propagates
    /// the store's error if the record cannot be created.
    pub fn new(
        store: S,
        blobs: B,
        architecture: serde_json::Value,
        config: &RecorderConfig,
        log: &LogContext,
    ) -> Result<Self> {
        config.validate()?;
        let log_location = log.log_location().map(|p| p.display().to_string());

        let mut builder = ExperimentRecord::builder(config.name.clone()).architecture(architecture);
        if let Some(location) = &log_location {
            builder = builder.log_location(location.clone());
        }
        let experiment_id = store.create(&builder.build())?;
        info!(experiment = %experiment_id, name = %config.name, "Experiment created");

        Ok(Self {
            store,
            blobs,
            experiment_id,
            config: config.clone(),
            log_location,
            status: ExperimentStatus::Created,
            checkpoint_when: Box::new(|_| true),
            checkpoints_saved: 0,
        })
    }

    /// Checkpoint at an epoch boundary only when `predicate` holds
    /// (default: every epoch).
    #[must_use]
    pub fn with_checkpoint_predicate(
        mut self,
        predicate: impl Fn(&TrainingResult) -> bool + 'static,
    ) -> Self {
        self.checkpoint_when = Box::new(predicate);
        self
    }

    /// Id assigned by the store.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Last status written.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Checkpoints appended by this recorder.
    #[must_use]
    pub const fn checkpoints_saved(&self) -> usize {
        self.checkpoints_saved
    }

    /// Experiment store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Blob store.
    #[must_use]
    pub const fn blobs(&self) -> &B {
        &self.blobs
    }

    /// Reload the persisted record.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub fn record(&self) -> Result<Option<ExperimentRecord>> {
        self.store.load(&self.experiment_id)
    }

    fn sync(
        &mut self,
        status: ExperimentStatus,
        result: &TrainingResult,
        model: &dyn ModelSnapshot,
        checkpoint: bool,
    ) -> Result<()> {
        self.status = status;
        let id = self.experiment_id.as_str();
        let metadata = RecordMetadata::from_result(status, self.log_location.clone(), result);

        with_retries("metadata", self.config.metadata_retries, || {
            self.store.update_metadata(id, &metadata)
        })?;
        with_retries("metrics", self.config.metadata_retries, || {
            self.store.replace_metrics(id, result.ledger())
        })?;
        debug!(experiment = %id, %status, "Experiment synced");

        if checkpoint {
            self.checkpoint(result, model)?;
        }
        Ok(())
    }

    fn checkpoint(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        let (epoch, batch) = result
            .snapshot()
            .map_or((result.current_epoch(), result.current_batch()), |s| (s.epoch, s.batch));
        let bytes = model.serialize()?;

        let attempts = self.config.checkpoint_retries + 1;
        let mut reason = String::new();
        for attempt in 1..=attempts {
            let appended = self.blobs.put(&bytes).and_then(|blob_ref| {
                let entry = CheckpointEntry::new(blob_ref, epoch, batch);
                self.store.append_checkpoint(&self.experiment_id, &entry)
            });
            match appended {
                Ok(()) => {
                    self.checkpoints_saved += 1;
                    info!(experiment = %self.experiment_id, epoch, batch, "Checkpoint saved");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Checkpoint append failed");
                    reason = e.to_string();
                }
            }
        }
        Err(Error::CheckpointAppend { attempts, reason })
    }
}

impl<S: ExperimentStore, B: BlobStore> Callback for ExperimentRecorder<S, B> {
    fn training_start(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        let initial = self.config.save_initial_snapshot;
        self.sync(ExperimentStatus::Training, result, model, initial)
    }

    fn batch_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        self.sync(ExperimentStatus::Training, result, model, false)
    }

    fn epoch_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        let due = (self.checkpoint_when)(result);
        self.sync(ExperimentStatus::Training, result, model, due)
    }

    fn training_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        self.sync(ExperimentStatus::TrainingComplete, result, model, false)
    }

    fn test_start(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        if !matches!(
            self.status,
            ExperimentStatus::TrainingComplete | ExperimentStatus::TestComplete
        ) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: ExperimentStatus::Testing.to_string(),
            });
        }
        self.sync(ExperimentStatus::Testing, result, model, false)
    }

    fn test_end(&mut self, result: &TrainingResult, model: &dyn ModelSnapshot) -> Result<()> {
        self.sync(ExperimentStatus::TestComplete, result, model, false)
    }
}
