//! Training result aggregate
//!
//! Append-only metric ledgers per phase plus progress counters. Owned by the
//! trainer; callbacks get a shared reference during each lifecycle event.
//!
//! Ledgers are never reordered or deduplicated: consumers rebuild time
//! series from insertion order.

use serde::{Deserialize, Serialize};

use crate::backend::MetricValues;
use crate::data::Phase;
use crate::Result;

/// Epoch counter value before the first training step.
pub const INITIAL_EPOCH: i64 = -1;

/// One metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Metric name
    pub name: String,
    /// Observed value
    pub value: f64,
    /// Epoch it was observed in (`-1` = before training)
    pub epoch: i64,
    /// Batch index within the epoch
    pub batch: u64,
}

/// Per-phase metric ledgers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricLedger {
    /// Training observations
    pub training: Vec<MetricEntry>,
    /// Validation observations
    pub validation: Vec<MetricEntry>,
    /// Test observations
    pub test: Vec<MetricEntry>,
}

impl MetricLedger {
    /// Entries of one phase, in insertion order.
    #[must_use]
    pub fn entries(&self, phase: Phase) -> &[MetricEntry] {
        match phase {
            Phase::Train => &self.training,
            Phase::Validation => &self.validation,
            Phase::Test => &self.test,
        }
    }

    fn entries_mut(&mut self, phase: Phase) -> &mut Vec<MetricEntry> {
        match phase {
            Phase::Train => &mut self.training,
            Phase::Validation => &mut self.validation,
            Phase::Test => &mut self.test,
        }
    }

    /// Values of one metric in one phase, in insertion order.
    #[must_use]
    pub fn series(&self, phase: Phase, name: &str) -> Vec<f64> {
        self.entries(phase)
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.value)
            .collect()
    }

    /// Total entries across phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.training.len() + self.validation.len() + self.test.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coordinates of the most recent model snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMarker {
    /// Epoch of the snapshot
    pub epoch: i64,
    /// Batch of the snapshot
    pub batch: u64,
}

/// Mutable aggregate of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    ledger: MetricLedger,
    current_epoch: i64,
    current_batch: u64,
    max_batches_per_epoch: Option<usize>,
    max_epochs: Option<usize>,
    snapshot: Option<SnapshotMarker>,
}

impl Default for TrainingResult {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingResult {
    /// Fresh result at epoch `-1`, batch 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ledger: MetricLedger::default(),
            current_epoch: INITIAL_EPOCH,
            current_batch: 0,
            max_batches_per_epoch: None,
            max_epochs: None,
            snapshot: None,
        }
    }

    /// Append one observation. `epoch`/`batch` default to the current
    /// counters.
    pub fn append_metric(
        &mut self,
        name: impl Into<String>,
        value: f64,
        phase: Phase,
        epoch: Option<i64>,
        batch: Option<u64>,
    ) {
        let entry = MetricEntry {
            name: name.into(),
            value,
            epoch: epoch.unwrap_or(self.current_epoch),
            batch: batch.unwrap_or(self.current_batch),
        };
        self.ledger.entries_mut(phase).push(entry);
    }

    /// [`append_metric`](Self::append_metric) with a phase given by name.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` unless `phase` is `training` (or
    /// `train`), `validation` or `test`.
    pub fn append_metric_named(
        &mut self,
        name: impl Into<String>,
        value: f64,
        phase: &str,
        epoch: Option<i64>,
        batch: Option<u64>,
    ) -> Result<()> {
        let phase: Phase = phase.parse()?;
        self.append_metric(name, value, phase, epoch, batch);
        Ok(())
    }

    /// Append every value of a backend step at the current counters.
    pub fn append_values(&mut self, phase: Phase, values: &MetricValues) {
        for metric in values {
            self.append_metric(metric.name.clone(), metric.value, phase, None, None);
        }
    }

    /// Record that the model snapshot now reflects `epoch`/`batch`
    /// (defaulting to the current counters) and move the counters there.
    pub fn update_snapshot(&mut self, epoch: Option<i64>, batch: Option<u64>) {
        self.current_epoch = epoch.unwrap_or(self.current_epoch);
        self.current_batch = batch.unwrap_or(self.current_batch);
        self.snapshot = Some(SnapshotMarker {
            epoch: self.current_epoch,
            batch: self.current_batch,
        });
    }

    /// Set the run limits. Batches per epoch is fixed once set.
    pub fn set_limits(&mut self, max_batches_per_epoch: usize, max_epochs: usize) {
        self.max_batches_per_epoch.get_or_insert(max_batches_per_epoch);
        self.max_epochs = Some(max_epochs);
    }

    /// Full ledger.
    #[must_use]
    pub const fn ledger(&self) -> &MetricLedger {
        &self.ledger
    }

    /// Ledger of one phase.
    #[must_use]
    pub fn metrics(&self, phase: Phase) -> &[MetricEntry] {
        self.ledger.entries(phase)
    }

    /// Current epoch (`-1` before training).
    #[must_use]
    pub const fn current_epoch(&self) -> i64 {
        self.current_epoch
    }

    /// Current batch within the epoch.
    #[must_use]
    pub const fn current_batch(&self) -> u64 {
        self.current_batch
    }

    /// Train batches per epoch, once training started.
    #[must_use]
    pub const fn max_batches_per_epoch(&self) -> Option<usize> {
        self.max_batches_per_epoch
    }

    /// Configured epochs, once training started.
    #[must_use]
    pub const fn max_epochs(&self) -> Option<usize> {
        self.max_epochs
    }

    /// Coordinates of the latest model snapshot.
    #[must_use]
    pub const fn snapshot(&self) -> Option<SnapshotMarker> {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_new_result_starts_before_training() {
        let result = TrainingResult::new();
        assert_eq!(result.current_epoch(), INITIAL_EPOCH);
        assert_eq!(result.current_batch(), 0);
        assert!(result.ledger().is_empty());
        assert!(result.snapshot().is_none());
    }

    #[test]
    fn test_append_defaults_to_current_counters() {
        let mut result = TrainingResult::new();
        result.update_snapshot(Some(2), Some(7));
        result.append_metric("loss", 0.3, Phase::Train, None, None);
        result.append_metric("loss", 0.2, Phase::Train, Some(5), Some(1));

        let entries = result.metrics(Phase::Train);
        assert_eq!((entries[0].epoch, entries[0].batch), (2, 7));
        assert_eq!((entries[1].epoch, entries[1].batch), (5, 1));
    }

    #[test]
    fn test_ledger_keeps_call_order_not_value_order() {
        let mut result = TrainingResult::new();
        let values = [0.9, 0.1, 0.5, 0.5, 0.3];
        for v in values {
            result.append_metric("loss", v, Phase::Train, None, None);
        }
        assert_eq!(result.metrics(Phase::Train).len(), values.len());
        assert_eq!(result.ledger().series(Phase::Train, "loss"), values.to_vec());
    }

    #[test]
    fn test_append_named_phase() {
        let mut result = TrainingResult::new();
        result
            .append_metric_named("acc", 0.8, "validation", None, None)
            .unwrap();
        assert_eq!(result.metrics(Phase::Validation).len(), 1);

        let err = result
            .append_metric_named("acc", 0.8, "holdout", None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(result.ledger().len(), 1);
    }

    #[test]
    fn test_max_batches_computed_once() {
        let mut result = TrainingResult::new();
        result.set_limits(3, 5);
        result.set_limits(9, 6);
        assert_eq!(result.max_batches_per_epoch(), Some(3));
        assert_eq!(result.max_epochs(), Some(6));
    }

    #[test]
    fn test_ledger_serializes_by_phase_key() {
        let mut result = TrainingResult::new();
        result.append_metric("loss", 1.0, Phase::Test, Some(0), Some(0));
        let json = serde_json::to_value(result.ledger()).unwrap();
        assert_eq!(json["test"][0]["name"], "loss");
        assert!(json["training"].as_array().unwrap().is_empty());
    }
}
