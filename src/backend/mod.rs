//! Model backend contract
//!
//! The core never sees model internals. A backend trains and evaluates on
//! [`Batch`]es, reports named metrics, and serializes itself on demand for
//! checkpoints.

use serde::{Deserialize, Serialize};

use crate::data::Batch;
use crate::{Error, Result};

/// One named metric observation from a backend step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Metric name (e.g. `"loss"`, `"accuracy"`)
    pub name: String,
    /// Observed value
    pub value: f64,
}

/// Ordered named metrics returned by one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricValues(Vec<MetricValue>);

impl MetricValues {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Pair `values` with `names` position by position.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if the lengths differ.
    pub fn from_aligned<S: AsRef<str>>(names: &[S], values: &[f64]) -> Result<Self> {
        if names.len() != values.len() {
            return Err(Error::Backend(format!(
                "backend reported {} values for {} metric names",
                values.len(),
                names.len()
            )));
        }
        Ok(names
            .iter()
            .zip(values)
            .map(|(name, &value)| (name.as_ref(), value))
            .collect())
    }

    /// Append a metric.
    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.0.push(MetricValue {
            name: name.into(),
            value,
        });
    }

    /// Value of the first metric called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Iterate in backend order.
    pub fn iter(&self) -> std::slice::Iter<'_, MetricValue> {
        self.0.iter()
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metrics were reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, f64)> for MetricValues {
    fn from_iter<T: IntoIterator<Item = (&'a str, f64)>>(iter: T) -> Self {
        let mut values = Self::new();
        for (name, value) in iter {
            values.push(name, value);
        }
        values
    }
}

impl<'a> IntoIterator for &'a MetricValues {
    type Item = &'a MetricValue;
    type IntoIter = std::slice::Iter<'a, MetricValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Serializable model state.
///
/// Callbacks receive the live model through this trait only for the
/// duration of a lifecycle event.
pub trait ModelSnapshot {
    /// Serialize the current model state to an opaque blob.
    ///
    /// # Errors
    ///
    /// Returns `Error::Backend` if the model cannot be serialized.
    fn serialize(&self) -> Result<Vec<u8>>;
}

/// Trainable model driven by the [`Trainer`](crate::trainer::Trainer).
pub trait ModelBackend: ModelSnapshot {
    /// Input feature type
    type Input;
    /// Label type
    type Label;

    /// Run one optimisation step on `batch`.
    ///
    /// # Errors
    ///
    /// Any error is fatal and halts the training loop.
    fn train_step(&mut self, batch: &Batch<Self::Input, Self::Label>) -> Result<MetricValues>;

    /// Evaluate `batch` without updating the model.
    ///
    /// # Errors
    ///
    /// Any error is fatal and halts the current pass.
    fn evaluate_step(&mut self, batch: &Batch<Self::Input, Self::Label>) -> Result<MetricValues>;

    /// Metric names, in the order steps report them.
    fn metric_names(&self) -> Vec<String>;

    /// Opaque architecture descriptor stored with the experiment.
    fn architecture(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}
