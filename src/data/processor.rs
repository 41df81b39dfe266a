//! Composable preprocessing chain
//!
//! Each stage maps `(raw, input, label, params)` to a new state; stages run
//! left to right and the chain's output must carry both an input and a
//! label. A failing stage aborts its sample.

use serde_json::{Map, Value};

use super::Batch;
use crate::config::SampleFailurePolicy;
use crate::{Error, Result};

/// Free-form values stages pass down the chain.
pub type PipedParams = Map<String, Value>;

/// State threaded through the stages for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleState<R, X, Y> {
    /// Raw record (stages may rewrite it)
    pub raw: R,
    /// Input features produced so far
    pub input: Option<X>,
    /// Label produced so far
    pub label: Option<Y>,
    /// Values piped between stages
    pub params: PipedParams,
}

impl<R, X, Y> SampleState<R, X, Y> {
    /// Initial state for a raw record.
    #[must_use]
    pub fn new(raw: R) -> Self {
        Self {
            raw,
            input: None,
            label: None,
            params: PipedParams::new(),
        }
    }
}

/// Final `(input, label)` pair for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSample<X, Y> {
    /// Input features
    pub input: X,
    /// Label
    pub label: Y,
}

/// One preprocessing stage.
///
/// Stages must not touch state outside the passed [`SampleState`].
pub trait Processor<R, X, Y> {
    /// Transform the sample state.
    ///
    /// # Errors
    ///
    /// Any error aborts the sample.
    fn process(&self, state: SampleState<R, X, Y>) -> Result<SampleState<R, X, Y>>;
}

impl<R, X, Y, F> Processor<R, X, Y> for F
where
    F: Fn(SampleState<R, X, Y>) -> Result<SampleState<R, X, Y>>,
{
    fn process(&self, state: SampleState<R, X, Y>) -> Result<SampleState<R, X, Y>> {
        self(state)
    }
}

/// Ordered list of stages.
pub struct ProcessorChain<R, X, Y> {
    stages: Vec<Box<dyn Processor<R, X, Y>>>,
}

impl<R, X, Y> ProcessorChain<R, X, Y> {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage (builder style).
    #[must_use]
    pub fn with_stage<P>(mut self, stage: P) -> Self
    where
        P: Processor<R, X, Y> + 'static,
    {
        self.push(stage);
        self
    }

    /// Append a stage.
    pub fn push<P>(&mut self, stage: P)
    where
        P: Processor<R, X, Y> + 'static,
    {
        self.stages.push(Box::new(stage));
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one record through every stage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Processing` (tagged with `index`) if a stage fails or
    /// the chain ends without an input or label.
    pub fn process_sample(&self, index: usize, raw: R) -> Result<ProcessedSample<X, Y>> {
        let mut state = SampleState::new(raw);
        for stage in &self.stages {
            state = stage.process(state).map_err(|e| Error::Processing {
                index,
                reason: e.to_string(),
            })?;
        }

        match (state.input, state.label) {
            (Some(input), Some(label)) => Ok(ProcessedSample { input, label }),
            (None, _) => Err(Error::Processing {
                index,
                reason: "no stage produced an input".into(),
            }),
            (_, None) => Err(Error::Processing {
                index,
                reason: "no stage produced a label".into(),
            }),
        }
    }

    /// Process a batch of raw records, keeping their order.
    ///
    /// # Errors
    ///
    /// With [`SampleFailurePolicy::AbortBatch`] the first failing sample's
    /// error is returned; with `SkipAndLog` failures are dropped.
    pub fn process_batch(&self, records: Vec<R>, policy: SampleFailurePolicy) -> Result<Batch<X, Y>> {
        let mut batch = Batch::with_capacity(records.len());
        for (index, raw) in records.into_iter().enumerate() {
            match self.process_sample(index, raw) {
                Ok(sample) => batch.push(sample),
                Err(e) if policy == SampleFailurePolicy::SkipAndLog => {
                    tracing::warn!(index, error = %e, "Skipping sample");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(batch)
    }
}

impl<R, X, Y> Default for ProcessorChain<R, X, Y> {
    fn default() -> Self {
        Self::new()
    }
}
