//! Data reader: partitioner windows -> fetched records -> processed batches

use super::{Batch, BatchSource, DataStore, DatasetPartitioner, LoadedBatch, Phase, ProcessorChain};
use crate::config::SampleFailurePolicy;
use crate::Result;

/// Couples a [`DatasetPartitioner`] with a [`ProcessorChain`].
pub struct DataReader<S: DataStore, X, Y> {
    partitioner: DatasetPartitioner<S>,
    chain: ProcessorChain<S::Record, X, Y>,
    failure_policy: SampleFailurePolicy,
}

impl<S: DataStore, X, Y> DataReader<S, X, Y> {
    /// Create a reader using the partitioner's configured
    /// [`sample_failure`](crate::config::PartitionConfig::sample_failure)
    /// policy.
    #[must_use]
    pub fn new(partitioner: DatasetPartitioner<S>, chain: ProcessorChain<S::Record, X, Y>) -> Self {
        let failure_policy = partitioner.config().sample_failure;
        Self {
            partitioner,
            chain,
            failure_policy,
        }
    }

    /// Override the per-sample failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: SampleFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Underlying partitioner.
    #[must_use]
    pub const fn partitioner(&self) -> &DatasetPartitioner<S> {
        &self.partitioner
    }

    /// Underlying partitioner, mutably (e.g. to restore a saved state).
    pub fn partitioner_mut(&mut self) -> &mut DatasetPartitioner<S> {
        &mut self.partitioner
    }
}

impl<S: DataStore, X, Y> BatchSource for DataReader<S, X, Y> {
    type Input = X;
    type Label = Y;

    fn next_batch(&mut self, phase: Phase) -> Result<LoadedBatch<X, Y>> {
        let window = self.partitioner.next_batch(phase);
        let batch = if window.ids.is_empty() {
            Batch::default()
        } else {
            let records = self.partitioner.fetch(&window.ids)?;
            self.chain.process_batch(records, self.failure_policy)?
        };
        Ok(LoadedBatch {
            batch,
            is_final: window.is_final,
        })
    }

    fn reset_epoch(&mut self) {
        self.partitioner.reset_epoch();
    }

    fn batches_per_epoch(&self) -> usize {
        self.partitioner.batches_per_epoch()
    }
}
