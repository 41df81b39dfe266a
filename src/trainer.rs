//! Trainer state machine
//!
//! ```text
//! Idle ──> TrainingBatch ──(final batch)──> ValidatingEpoch ──> TrainingBatch ──> ... ──> Completed
//!                                                                                          │
//!                                                              Testing <──(on demand)──────┘
//! ```
//!
//! The loop is synchronous: every data, backend and callback call blocks.
//! Data, backend and callback errors are fatal; nothing is retried and the
//! trainer ends in `Failed`.

use std::fmt;

use crate::backend::{MetricValues, ModelBackend};
use crate::callback::{Callback, LifecycleEvent};
use crate::config::{EvaluationReduction, TrainerConfig};
use crate::data::{BatchSource, Phase};
use crate::logging::LogContext;
use crate::result::TrainingResult;
use crate::{Error, Result};

/// Trainer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    /// Not started
    Idle,
    /// Consuming train batches
    TrainingBatch,
    /// Running the end-of-epoch validation pass
    ValidatingEpoch,
    /// All epochs done
    Completed,
    /// Running the test pass
    Testing,
    /// A data, backend or callback error stopped the run. Terminal: build a
    /// new trainer (see [`Trainer::into_model`]) to continue.
    Failed,
}

impl fmt::Display for TrainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::TrainingBatch => "training",
            Self::ValidatingEpoch => "validating",
            Self::Completed => "completed",
            Self::Testing => "testing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Limits progress lines to `max_logs` per epoch, spread over the epoch.
#[derive(Debug, Clone, Copy)]
struct ProgressThrottle {
    max_logs: usize,
    logged: usize,
}

impl ProgressThrottle {
    const fn new(max_logs: usize) -> Self {
        Self {
            max_logs,
            logged: 0,
        }
    }

    fn reset(&mut self) {
        self.logged = 0;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn should_log(&mut self, batch: u64, batches_per_epoch: usize) -> bool {
        if self.max_logs == 0 {
            return false;
        }
        let allowed = ((batch + 1) as usize * self.max_logs)
            .div_ceil(batches_per_epoch.max(1))
            .min(self.max_logs);
        if self.logged < allowed {
            self.logged += 1;
            true
        } else {
            false
        }
    }
}

/// Combines metrics from the sub-batches of one evaluation pass.
struct EvaluationAccumulator {
    reduction: EvaluationReduction,
    sums: Vec<(String, f64)>,
    samples: usize,
    first: Option<MetricValues>,
}

impl EvaluationAccumulator {
    const fn new(reduction: EvaluationReduction) -> Self {
        Self {
            reduction,
            sums: Vec::new(),
            samples: 0,
            first: None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn add(&mut self, values: MetricValues, samples: usize) {
        match self.reduction {
            EvaluationReduction::FirstBatch => {
                self.first.get_or_insert(values);
            }
            EvaluationReduction::Mean => {
                let weight = samples as f64;
                for metric in &values {
                    match self.sums.iter_mut().find(|(name, _)| *name == metric.name) {
                        Some((_, sum)) => *sum += metric.value * weight,
                        None => self.sums.push((metric.name.clone(), metric.value * weight)),
                    }
                }
                self.samples += samples;
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self) -> Option<MetricValues> {
        match self.reduction {
            EvaluationReduction::FirstBatch => self.first,
            EvaluationReduction::Mean if self.samples == 0 => None,
            EvaluationReduction::Mean => {
                let total = self.samples as f64;
                Some(
                    self.sums
                        .iter()
                        .map(|(name, sum)| (name.as_str(), sum / total))
                        .collect(),
                )
            }
        }
    }
}

fn format_metrics(values: &MetricValues) -> String {
    values
        .iter()
        .map(|m| format!("{}: {:.4}", m.name, m.value))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Drives a [`ModelBackend`] over a [`BatchSource`].
pub struct Trainer<'a, M, D> {
    model: M,
    source: D,
    callbacks: Vec<Box<dyn Callback + 'a>>,
    result: TrainingResult,
    config: TrainerConfig,
    state: TrainerState,
    progress: ProgressThrottle,
    log: LogContext,
}

impl<'a, M, D> Trainer<'a, M, D>
where
    M: ModelBackend,
    D: BatchSource<Input = M::Input, Label = M::Label>,
{
    /// Create an idle trainer.
    #[must_use]
    pub fn new(model: M, source: D, config: TrainerConfig) -> Self {
        Self {
            model,
            source,
            callbacks: Vec::new(),
            result: TrainingResult::new(),
            progress: ProgressThrottle::new(config.max_progress_logs),
            config,
            state: TrainerState::Idle,
            log: LogContext::new("trainer"),
        }
    }

    /// Register a callback (builder style). Callbacks fire in registration
    /// order.
    #[must_use]
    pub fn with_callback<C: Callback + 'a>(mut self, callback: C) -> Self {
        self.add_callback(callback);
        self
    }

    /// Register a callback.
    pub fn add_callback<C: Callback + 'a>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    /// Use the given logging context for spans.
    #[must_use]
    pub fn with_log_context(mut self, log: &LogContext) -> Self {
        self.log = log.clone();
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TrainerState {
        self.state
    }

    /// Results so far.
    #[must_use]
    pub const fn result(&self) -> &TrainingResult {
        &self.result
    }

    /// The model backend.
    #[must_use]
    pub const fn model(&self) -> &M {
        &self.model
    }

    /// The batch source.
    #[must_use]
    pub const fn source(&self) -> &D {
        &self.source
    }

    /// Loop configuration.
    #[must_use]
    pub const fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Consume the trainer, returning the model.
    pub fn into_model(self) -> M {
        self.model
    }

    /// Train for the configured number of epochs.
    ///
    /// A train batch whose samples were all dropped by the reader's
    /// failure policy is skipped: no train step, no `batch_end`. Its final
    /// flag still ends the epoch.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless idle, `Error::Configuration` for
    /// zero epochs or an empty train partition, and propagates data, backend
    /// and callback failures. Those are fatal: the trainer moves to
    /// [`TrainerState::Failed`].
    pub fn train(&mut self) -> Result<()> {
        if self.state != TrainerState::Idle {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
                operation: "train",
            });
        }
        self.config.validate()?;
        let batches_per_epoch = self.source.batches_per_epoch();
        if batches_per_epoch == 0 {
            return Err(Error::Configuration("train partition is empty".into()));
        }

        let span = self.log.span("train");
        let _guard = span.enter();

        let outcome = self.run_epochs(batches_per_epoch);
        if let Err(e) = &outcome {
            tracing::error!(state = %self.state, error = %e, "Training failed");
            self.state = TrainerState::Failed;
        }
        outcome
    }

    fn run_epochs(&mut self, batches_per_epoch: usize) -> Result<()> {
        let epochs = self.config.epochs;
        self.result.set_limits(batches_per_epoch, epochs);
        // Epoch -1: untrained weights
        self.result.update_snapshot(None, None);
        self.state = TrainerState::TrainingBatch;
        tracing::info!(epochs, batches_per_epoch, "Training started");
        self.fire(LifecycleEvent::TrainingStart)?;

        let mut epoch = 0usize;
        let mut batch = 0u64;
        while epoch < epochs {
            let loaded = self.source.next_batch(Phase::Train)?;
            if loaded.batch.is_empty() {
                tracing::warn!(epoch, batch, "Every sample in the batch was dropped, skipping step");
            } else {
                let metrics = self.model.train_step(&loaded.batch)?;
                self.result
                    .update_snapshot(Some(i64::try_from(epoch).unwrap_or(i64::MAX)), Some(batch));
                self.result.append_values(Phase::Train, &metrics);
                self.fire(LifecycleEvent::BatchEnd)?;
                self.log_progress(epoch, batch, &metrics);
            }

            if loaded.is_final {
                self.state = TrainerState::ValidatingEpoch;
                self.progress.reset();
                self.evaluate(Phase::Validation)?;
                self.source.reset_epoch();
                self.fire(LifecycleEvent::EpochEnd)?;

                batch = 0;
                epoch += 1;
                self.state = TrainerState::TrainingBatch;
            } else {
                batch += 1;
            }
        }

        self.state = TrainerState::Completed;
        tracing::info!(epochs, "Training complete");
        self.fire(LifecycleEvent::TrainingEnd)
    }

    /// Run one evaluation pass over the test partition.
    ///
    /// Allowed when idle or completed; the state is restored afterwards.
    /// Testing an untrained model is allowed here, but an
    /// [`ExperimentRecorder`](crate::experiment::ExperimentRecorder) only
    /// accepts a test pass once its record is `TrainingComplete`.
    ///
    /// Returns the recorded metrics, or `None` if the partition is empty.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` while training or after a failure, and
    /// propagates data, backend and callback failures (the trainer moves to
    /// [`TrainerState::Failed`]).
    pub fn test(&mut self) -> Result<Option<MetricValues>> {
        let resume = match self.state {
            TrainerState::Idle | TrainerState::Completed => self.state,
            other => {
                return Err(Error::InvalidState {
                    state: other.to_string(),
                    operation: "test",
                })
            }
        };

        let span = self.log.span("test");
        let _guard = span.enter();

        self.state = TrainerState::Testing;
        match self.run_test() {
            Ok(values) => {
                self.state = resume;
                Ok(values)
            }
            Err(e) => {
                tracing::error!(error = %e, "Test pass failed");
                self.state = TrainerState::Failed;
                Err(e)
            }
        }
    }

    fn run_test(&mut self) -> Result<Option<MetricValues>> {
        self.fire(LifecycleEvent::TestStart)?;
        let values = self.evaluate(Phase::Test)?;
        self.fire(LifecycleEvent::TestEnd)?;
        Ok(values)
    }

    fn fire(&mut self, event: LifecycleEvent) -> Result<()> {
        tracing::trace!(%event, callbacks = self.callbacks.len(), "Dispatching");
        for callback in &mut self.callbacks {
            event.notify(callback.as_mut(), &self.result, &self.model)?;
        }
        Ok(())
    }

    /// Evaluate every window of `phase` and append the reduced metrics.
    fn evaluate(&mut self, phase: Phase) -> Result<Option<MetricValues>> {
        let mut accumulator = EvaluationAccumulator::new(self.config.evaluation);
        loop {
            let loaded = self.source.next_batch(phase)?;
            if !loaded.batch.is_empty() {
                let values = self.model.evaluate_step(&loaded.batch)?;
                accumulator.add(values, loaded.batch.len());
            }
            if loaded.is_final {
                break;
            }
        }

        let Some(values) = accumulator.finish() else {
            tracing::warn!(%phase, "Partition is empty, skipping evaluation");
            return Ok(None);
        };

        self.result.append_values(phase, &values);
        tracing::info!(
            %phase,
            epoch = self.result.current_epoch(),
            "{} => {}",
            phase,
            format_metrics(&values)
        );
        Ok(Some(values))
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn log_progress(&mut self, epoch: usize, batch: u64, metrics: &MetricValues) {
        let per_epoch = self.result.max_batches_per_epoch().unwrap_or(1).max(1);
        if !self.progress.should_log(batch, per_epoch) {
            return;
        }
        let done = epoch * per_epoch + batch as usize + 1;
        let total = (self.config.epochs * per_epoch).max(1);
        let percent = done as f64 / total as f64 * 100.0;
        tracing::info!(epoch, batch, "{:.2}% => {}", percent, format_metrics(metrics));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ModelSnapshot;
    use crate::data::{Batch, LoadedBatch};

    /// Source serving `per_epoch` train batches of `size` samples.
    struct CountingSource {
        per_epoch: usize,
        size: usize,
        served: usize,
        resets: usize,
        eval_windows: usize,
        eval_served: usize,
        /// Leading train batches served empty
        empty_first: usize,
    }

    impl CountingSource {
        fn new(per_epoch: usize, size: usize) -> Self {
            Self {
                per_epoch,
                size,
                served: 0,
                resets: 0,
                eval_windows: 1,
                eval_served: 0,
                empty_first: 0,
            }
        }

        fn batch(&self, n: usize, value: f64) -> Batch<f64, f64> {
            Batch {
                inputs: vec![value; n],
                labels: vec![value; n],
            }
        }
    }

    impl BatchSource for CountingSource {
        type Input = f64;
        type Label = f64;

        #[allow(clippy::cast_precision_loss)]
        fn next_batch(&mut self, phase: Phase) -> Result<LoadedBatch<f64, f64>> {
            match phase {
                Phase::Train => {
                    self.served += 1;
                    let n = if self.served <= self.empty_first { 0 } else { self.size };
                    Ok(LoadedBatch {
                        batch: self.batch(n, 1.0),
                        is_final: self.served % self.per_epoch == 0,
                    })
                }
                Phase::Validation | Phase::Test => {
                    self.eval_served += 1;
                    let index = self.eval_served;
                    let is_final = index % self.eval_windows == 0;
                    // window i has i samples of value i
                    let i = (index - 1) % self.eval_windows + 1;
                    Ok(LoadedBatch {
                        batch: self.batch(i, i as f64),
                        is_final,
                    })
                }
            }
        }

        fn reset_epoch(&mut self) {
            self.resets += 1;
        }

        fn batches_per_epoch(&self) -> usize {
            self.per_epoch
        }
    }

    /// Reports the mean input as "loss".
    struct MeanModel {
        steps: usize,
        fail_at: Option<usize>,
    }

    impl ModelSnapshot for MeanModel {
        fn serialize(&self) -> Result<Vec<u8>> {
            Ok(self.steps.to_le_bytes().to_vec())
        }
    }

    impl ModelBackend for MeanModel {
        type Input = f64;
        type Label = f64;

        fn train_step(&mut self, batch: &Batch<f64, f64>) -> Result<MetricValues> {
            self.steps += 1;
            if self.fail_at == Some(self.steps) {
                return Err(Error::Backend("nan loss".into()));
            }
            self.evaluate_step(batch)
        }

        #[allow(clippy::cast_precision_loss)]
        fn evaluate_step(&mut self, batch: &Batch<f64, f64>) -> Result<MetricValues> {
            let mean = batch.inputs.iter().sum::<f64>() / batch.len() as f64;
            MetricValues::from_aligned(&self.metric_names(), &[mean])
        }

        fn metric_names(&self) -> Vec<String> {
            vec!["loss".into()]
        }
    }

    fn model() -> MeanModel {
        MeanModel {
            steps: 0,
            fail_at: None,
        }
    }

    #[test]
    fn test_train_runs_all_epochs() {
        let mut trainer = Trainer::new(model(), CountingSource::new(3, 4), TrainerConfig::default().epochs(2));
        trainer.train().unwrap();

        assert_eq!(trainer.state(), TrainerState::Completed);
        assert_eq!(trainer.model().steps, 6);
        assert_eq!(trainer.source().resets, 2);
        assert_eq!(trainer.result().metrics(Phase::Train).len(), 6);
        assert_eq!(trainer.result().metrics(Phase::Validation).len(), 2);
        assert_eq!(trainer.result().max_batches_per_epoch(), Some(3));
        assert_eq!(trainer.result().current_epoch(), 1);
    }

    #[test]
    fn test_train_twice_is_rejected() {
        let mut trainer = Trainer::new(model(), CountingSource::new(1, 1), TrainerConfig::default().epochs(1));
        trainer.train().unwrap();
        assert!(matches!(trainer.train(), Err(Error::InvalidState { .. })));
    }

    #[test]
    fn test_backend_failure_halts_loop() {
        let failing = MeanModel {
            steps: 0,
            fail_at: Some(2),
        };
        let mut trainer = Trainer::new(failing, CountingSource::new(5, 2), TrainerConfig::default().epochs(3));
        let err = trainer.train().unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(trainer.result().metrics(Phase::Train).len(), 1);
    }

    #[test]
    fn test_mean_reduction_is_sample_weighted() {
        let mut source = CountingSource::new(1, 1);
        source.eval_windows = 3;
        let mut trainer = Trainer::new(model(), source, TrainerConfig::default().epochs(1));
        trainer.train().unwrap();

        // windows: 1 x 1.0, 2 x 2.0, 3 x 3.0 -> (1 + 4 + 9) / 6
        let val = trainer.result().ledger().series(Phase::Validation, "loss");
        assert_eq!(val.len(), 1);
        assert!((val[0] - 14.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_first_batch_reduction() {
        let mut source = CountingSource::new(1, 1);
        source.eval_windows = 3;
        let config = TrainerConfig::default()
            .epochs(1)
            .evaluation(EvaluationReduction::FirstBatch);
        let mut trainer = Trainer::new(model(), source, config);
        trainer.train().unwrap();

        let val = trainer.result().ledger().series(Phase::Validation, "loss");
        assert_eq!(val, vec![1.0]);
        // every window was still consumed
        assert_eq!(trainer.source().eval_served, 3);
    }

    #[test]
    fn test_test_pass_returns_metrics_and_restores_state() {
        let mut trainer = Trainer::new(model(), CountingSource::new(2, 2), TrainerConfig::default().epochs(1));
        trainer.train().unwrap();
        let values = trainer.test().unwrap().unwrap();
        assert_eq!(values.get("loss"), Some(1.0));
        assert_eq!(trainer.state(), TrainerState::Completed);
        assert_eq!(trainer.result().metrics(Phase::Test).len(), 1);
    }

    #[test]
    fn test_zero_epochs_is_configuration_error() {
        let mut trainer = Trainer::new(model(), CountingSource::new(2, 2), TrainerConfig::default().epochs(0));
        assert!(matches!(trainer.train(), Err(Error::Configuration(_))));
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_empty_train_partition_is_configuration_error() {
        let mut trainer = Trainer::new(model(), CountingSource::new(0, 0), TrainerConfig::default().epochs(1));
        assert!(matches!(trainer.train(), Err(Error::Configuration(_))));
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_fully_dropped_batch_is_skipped() {
        let mut source = CountingSource::new(3, 4);
        source.empty_first = 1;
        let mut trainer = Trainer::new(model(), source, TrainerConfig::default().epochs(2));
        trainer.train().unwrap();

        assert_eq!(trainer.state(), TrainerState::Completed);
        assert_eq!(trainer.model().steps, 5);
        assert_eq!(trainer.result().metrics(Phase::Train).len(), 5);
        assert_eq!(trainer.result().metrics(Phase::Validation).len(), 2);
    }

    #[test]
    fn test_dropped_final_batch_still_ends_epoch() {
        let mut source = CountingSource::new(1, 4);
        source.empty_first = 1;
        let mut trainer = Trainer::new(model(), source, TrainerConfig::default().epochs(2));
        trainer.train().unwrap();

        assert_eq!(trainer.model().steps, 1);
        assert_eq!(trainer.source().resets, 2);
        assert_eq!(trainer.result().metrics(Phase::Validation).len(), 2);
    }

    #[test]
    fn test_failure_is_terminal() {
        let failing = MeanModel {
            steps: 0,
            fail_at: Some(1),
        };
        let mut trainer = Trainer::new(failing, CountingSource::new(2, 2), TrainerConfig::default().epochs(1));
        assert!(trainer.train().is_err());
        assert_eq!(trainer.state(), TrainerState::Failed);
        assert!(matches!(trainer.train(), Err(Error::InvalidState { .. })));
        assert!(matches!(trainer.test(), Err(Error::InvalidState { .. })));
        assert_eq!(trainer.into_model().steps, 1);
    }

    #[test]
    fn test_progress_throttle_caps_logs_per_epoch() {
        let mut throttle = ProgressThrottle::new(5);
        let logged: Vec<u64> = (0..100).filter(|&b| throttle.should_log(b, 100)).collect();
        assert_eq!(logged, vec![0, 20, 40, 60, 80]);
        throttle.reset();
        assert!(throttle.should_log(0, 100));

        let mut short = ProgressThrottle::new(5);
        assert_eq!((0..3).filter(|&b| short.should_log(b, 3)).count(), 3);
        let mut off = ProgressThrottle::new(0);
        assert!(!off.should_log(0, 10));
    }
}
