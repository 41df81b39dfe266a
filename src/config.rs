//! Pipeline configuration
//!
//! All sections deserialize with defaults, so a config file only needs the
//! fields it changes:
//!
//! ```json
//! {
//!   "partition": { "split": [78, 22, 0], "batch_size": 32, "seed": 7 },
//!   "trainer":   { "epochs": 3 },
//!   "recorder":  { "name": "accident-v1" }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::ListQuery;
use crate::{Error, Result};

/// Train/validation/test percentages. Must sum to exactly 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRatios(pub u32, pub u32, pub u32);

impl SplitRatios {
    /// Train percentage.
    #[must_use]
    pub const fn train(&self) -> u32 {
        self.0
    }

    /// Validation percentage.
    #[must_use]
    pub const fn validation(&self) -> u32 {
        self.1
    }

    /// Test percentage.
    #[must_use]
    pub const fn test(&self) -> u32 {
        self.2
    }

    /// Check the ratios sum to exactly 100.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` otherwise.
    pub fn validate(&self) -> Result<()> {
        let sum = u64::from(self.0) + u64::from(self.1) + u64::from(self.2);
        if sum == 100 {
            Ok(())
        } else {
            Err(Error::Configuration(format!(
                "split ratios ({}, {}, {}) sum to {sum}, expected exactly 100",
                self.0, self.1, self.2
            )))
        }
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self(80, 20, 0)
    }
}

/// When a train window counts as the last one of its epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalBatchPolicy {
    /// Final as soon as fewer than one more full batch remains after the
    /// window. The trailing partial window is never emitted.
    #[default]
    Anticipate,
    /// Final only when the window reaches the end of the partition. The
    /// trailing partial window is emitted on its own.
    EmitPartial,
}

impl FinalBatchPolicy {
    /// Whether a window with nominal end `end` (start + `batch_size`, not
    /// clamped) over a partition of `len` ids is final.
    #[must_use]
    pub const fn is_final(self, end: usize, batch_size: usize, len: usize) -> bool {
        match self {
            Self::Anticipate => end + batch_size > len,
            Self::EmitPartial => end >= len,
        }
    }

    /// Number of windows one pass over `len` ids yields. Zero only for an
    /// empty partition; a partition shorter than one batch still yields one.
    #[must_use]
    pub const fn windows_per_pass(self, len: usize, batch_size: usize) -> usize {
        let windows = match self {
            Self::Anticipate => len / batch_size,
            Self::EmitPartial => len.div_ceil(batch_size),
        };
        if windows == 0 && len > 0 {
            1
        } else {
            windows
        }
    }
}

/// How metrics from several evaluation sub-batches are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReduction {
    /// Sample-weighted mean across all sub-batches.
    #[default]
    Mean,
    /// Keep only the first sub-batch's metrics.
    FirstBatch,
}

/// What happens to a batch when one of its samples fails processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFailurePolicy {
    /// Propagate the first failure and abort the batch.
    #[default]
    AbortBatch,
    /// Drop the failing sample, log a warning, keep the rest.
    SkipAndLog,
}

/// Dataset partitioning and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Train/validation/test percentages
    pub split: SplitRatios,
    /// Train window size
    pub batch_size: usize,
    /// Validation/test window size; `None` serves the whole partition at once
    pub eval_batch_size: Option<usize>,
    /// Shuffle the universe before slicing and the train partition every epoch
    pub shuffle: bool,
    /// Contiguous ids permuted as one unit (1 = uniform shuffle)
    pub shuffle_block_size: usize,
    /// RNG seed; `None` seeds from OS entropy
    pub seed: Option<u64>,
    /// Final-window policy
    pub final_batch: FinalBatchPolicy,
    /// Filter/sort/limit forwarded to the data store when listing ids
    pub query: ListQuery,
    /// What a reader does with a sample the processor chain rejects
    pub sample_failure: SampleFailurePolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            split: SplitRatios::default(),
            batch_size: 32,
            eval_batch_size: None,
            shuffle: true,
            shuffle_block_size: 1,
            seed: None,
            final_batch: FinalBatchPolicy::default(),
            query: ListQuery::default(),
            sample_failure: SampleFailurePolicy::default(),
        }
    }
}

impl PartitionConfig {
    /// Set split ratios.
    #[must_use]
    pub const fn split(mut self, train: u32, validation: u32, test: u32) -> Self {
        self.split = SplitRatios(train, validation, test);
        self
    }

    /// Set train batch size.
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set validation/test batch size.
    #[must_use]
    pub const fn eval_batch_size(mut self, eval_batch_size: Option<usize>) -> Self {
        self.eval_batch_size = eval_batch_size;
        self
    }

    /// Enable or disable shuffling, with the given block size.
    #[must_use]
    pub const fn shuffle(mut self, shuffle: bool, block_size: usize) -> Self {
        self.shuffle = shuffle;
        self.shuffle_block_size = block_size;
        self
    }

    /// Seed the shuffle RNG.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the final-window policy.
    #[must_use]
    pub const fn final_batch(mut self, policy: FinalBatchPolicy) -> Self {
        self.final_batch = policy;
        self
    }

    /// Set the per-sample failure policy.
    #[must_use]
    pub const fn sample_failure(mut self, policy: SampleFailurePolicy) -> Self {
        self.sample_failure = policy;
        self
    }

    /// Set the identifier query.
    #[must_use]
    pub fn query(mut self, query: ListQuery) -> Self {
        self.query = query;
        self
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for bad ratios or zero sizes.
    pub fn validate(&self) -> Result<()> {
        self.split.validate()?;
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be >= 1".into()));
        }
        if self.eval_batch_size == Some(0) {
            return Err(Error::Configuration("eval_batch_size must be >= 1".into()));
        }
        if self.shuffle_block_size == 0 {
            return Err(Error::Configuration("shuffle_block_size must be >= 1".into()));
        }
        Ok(())
    }
}

/// Training loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of epochs to train
    pub epochs: usize,
    /// Progress lines logged per epoch at most
    pub max_progress_logs: usize,
    /// Reduction over evaluation sub-batches
    pub evaluation: EvaluationReduction,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            max_progress_logs: 5,
            evaluation: EvaluationReduction::default(),
        }
    }
}

impl TrainerConfig {
    /// Set the epoch count.
    #[must_use]
    pub const fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the evaluation reduction.
    #[must_use]
    pub const fn evaluation(mut self, evaluation: EvaluationReduction) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when `epochs` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Configuration("epochs must be >= 1".into()));
        }
        Ok(())
    }
}

/// Experiment persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Experiment name
    pub name: String,
    /// Checkpoint the untrained model at training start
    pub save_initial_snapshot: bool,
    /// Extra attempts for metadata/metrics overwrites
    pub metadata_retries: u32,
    /// Extra attempts for checkpoint blob writes and appends
    pub checkpoint_retries: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            name: "experiment".into(),
            save_initial_snapshot: false,
            metadata_retries: 2,
            checkpoint_retries: 2,
        }
    }
}

impl RecorderConfig {
    /// Create a config with the given experiment name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checkpoint the untrained model at training start.
    #[must_use]
    pub const fn save_initial_snapshot(mut self, save: bool) -> Self {
        self.save_initial_snapshot = save;
        self
    }

    /// Set retry counts for metadata and checkpoint writes.
    #[must_use]
    pub const fn retries(mut self, metadata: u32, checkpoint: u32) -> Self {
        self.metadata_retries = metadata;
        self.checkpoint_retries = checkpoint;
        self
    }

    /// Validate required fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the name is blank.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("experiment name is required".into()));
        }
        Ok(())
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Partitioning and batching
    pub partition: PartitionConfig,
    /// Training loop
    pub trainer: TrainerConfig,
    /// Experiment persistence
    pub recorder: RecorderConfig,
}

impl PipelineConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` for malformed JSON and
    /// `Error::Configuration` for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read, plus the errors of
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section's `Error::Configuration`.
    pub fn validate(&self) -> Result<()> {
        self.partition.validate()?;
        self.trainer.validate()?;
        self.recorder.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ratios_must_sum_to_100() {
        assert!(SplitRatios(80, 20, 0).validate().is_ok());
        assert!(SplitRatios(70, 15, 15).validate().is_ok());

        let err = SplitRatios(80, 20, 5).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("sum to 105"));
    }

    #[test]
    fn test_anticipate_policy_flags_one_batch_early() {
        let policy = FinalBatchPolicy::Anticipate;
        // 100 ids, batch 32: windows end at 32, 64, 96
        assert!(!policy.is_final(32, 32, 100));
        assert!(!policy.is_final(64, 32, 100));
        assert!(policy.is_final(96, 32, 100));
        assert_eq!(policy.windows_per_pass(100, 32), 3);
        assert_eq!(policy.windows_per_pass(64, 32), 2);
    }

    #[test]
    fn test_emit_partial_policy() {
        let policy = FinalBatchPolicy::EmitPartial;
        assert!(!policy.is_final(96, 32, 100));
        assert!(policy.is_final(128, 32, 100));
        assert_eq!(policy.windows_per_pass(100, 32), 4);
    }

    #[test]
    fn test_windows_per_pass_zero_only_when_empty() {
        assert_eq!(FinalBatchPolicy::Anticipate.windows_per_pass(10, 32), 1);
        assert_eq!(FinalBatchPolicy::EmitPartial.windows_per_pass(10, 32), 1);
        assert_eq!(FinalBatchPolicy::Anticipate.windows_per_pass(0, 32), 0);
        assert_eq!(FinalBatchPolicy::EmitPartial.windows_per_pass(0, 32), 0);
    }

    #[test]
    fn test_pipeline_config_defaults_from_empty_json() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.partition.batch_size, 32);
        assert_eq!(config.trainer.epochs, 5);
    }

    #[test]
    fn test_pipeline_config_partial_json() {
        let config = PipelineConfig::from_json_str(
            r#"{"partition": {"split": [78, 22, 0], "seed": 7, "final_batch": "emit_partial",
                              "sample_failure": "skip_and_log"},
                "trainer": {"epochs": 3, "evaluation": "first_batch"},
                "recorder": {"name": "accident-v1"}}"#,
        )
        .unwrap();
        assert_eq!(config.partition.split, SplitRatios(78, 22, 0));
        assert_eq!(config.partition.seed, Some(7));
        assert_eq!(config.partition.final_batch, FinalBatchPolicy::EmitPartial);
        assert_eq!(config.partition.sample_failure, SampleFailurePolicy::SkipAndLog);
        assert_eq!(config.trainer.epochs, 3);
        assert_eq!(config.trainer.evaluation, EvaluationReduction::FirstBatch);
        assert_eq!(config.recorder.name, "accident-v1");
    }

    #[test]
    fn test_pipeline_config_rejects_bad_values() {
        let bad_split = PipelineConfig::from_json_str(r#"{"partition": {"split": [50, 20, 20]}}"#);
        assert!(matches!(bad_split, Err(Error::Configuration(_))));

        let zero_batch = PipelineConfig::from_json_str(r#"{"partition": {"batch_size": 0}}"#);
        assert!(matches!(zero_batch, Err(Error::Configuration(_))));

        let no_name = PipelineConfig::from_json_str(r#"{"recorder": {"name": "  "}}"#);
        assert!(matches!(no_name, Err(Error::Configuration(_))));

        let malformed = PipelineConfig::from_json_str("{not json");
        assert!(matches!(malformed, Err(Error::Serialization(_))));
    }
}
