//! Dataset partitioner
//!
//! Loads the identifier universe once, optionally shuffles it, slices it into
//! train/validation/test partitions and serves cursor-based windows per
//! phase.
//!
//! ## Slicing
//!
//! Boundaries use truncating integer arithmetic on the universe size `N`:
//!
//! ```text
//! train_end      = floor(train% * N / 100)
//! validation_end = train_end + floor(val% * N / 100)
//! test           = [validation_end, N)      (absorbs rounding slack)
//! ```
//!
//! ## Ordering
//!
//! [`DatasetPartitioner::fetch`] places whatever the store returns at the
//! position of each id in the request list. Each position is filled once.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{DataStore, Phase};
use crate::config::PartitionConfig;
use crate::{Error, Result};

/// Disjoint train/validation/test identifier lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitions<I> {
    /// Train ids
    pub train: Vec<I>,
    /// Validation ids
    pub validation: Vec<I>,
    /// Test ids
    pub test: Vec<I>,
}

impl<I> Partitions<I> {
    /// Ids for one phase.
    #[must_use]
    pub fn get(&self, phase: Phase) -> &[I] {
        match phase {
            Phase::Train => &self.train,
            Phase::Validation => &self.validation,
            Phase::Test => &self.test,
        }
    }

    /// Total ids across all phases.
    #[must_use]
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }
}

/// Identifiers of one window plus the end-of-pass flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWindow<I> {
    /// Ids to fetch, in batch order
    pub ids: Vec<I>,
    /// Last window of the epoch/pass
    pub is_final: bool,
}

/// Serializable partitioner position, for resuming a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionerState<I> {
    /// Current partitions (train order reflects the latest shuffle)
    pub partitions: Partitions<I>,
    /// Cursor per phase, in `Phase::ALL` order
    pub cursors: [usize; 3],
}

/// Splits a record universe into phases and yields ordered batch windows.
pub struct DatasetPartitioner<S: DataStore> {
    store: S,
    config: PartitionConfig,
    partitions: Partitions<S::Id>,
    cursors: [usize; 3],
    rng: StdRng,
}

impl<S: DataStore> DatasetPartitioner<S> {
    /// Load, shuffle and slice the identifier universe.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an invalid config (ratios not
    /// summing to 100, zero sizes) and propagates store failures.
    pub fn new(store: S, config: PartitionConfig) -> Result<Self> {
        config.validate()?;

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        tracing::info!("Loading record identifiers");
        let mut universe = store.list_identifiers(&config.query)?;
        if config.shuffle {
            shuffle_blocks(&mut universe, config.shuffle_block_size, &mut rng);
        }

        let partitions = split_universe(universe, &config);
        tracing::info!(
            train = partitions.train.len(),
            validation = partitions.validation.len(),
            test = partitions.test.len(),
            "Identifiers partitioned (train|validation|test)"
        );

        Ok(Self {
            store,
            config,
            partitions,
            cursors: [0; 3],
            rng,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Current partitions.
    #[must_use]
    pub const fn partitions(&self) -> &Partitions<S::Id> {
        &self.partitions
    }

    /// Ids of one phase.
    #[must_use]
    pub fn partition(&self, phase: Phase) -> &[S::Id] {
        self.partitions.get(phase)
    }

    /// Universe size `N`.
    #[must_use]
    pub fn universe_size(&self) -> usize {
        self.partitions.total()
    }

    /// Cursor of one phase.
    #[must_use]
    pub const fn cursor(&self, phase: Phase) -> usize {
        self.cursors[phase.index()]
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Window size for a phase; `None` means "whole partition".
    fn window_size(&self, phase: Phase) -> Option<usize> {
        match phase {
            Phase::Train => Some(self.config.batch_size),
            Phase::Validation | Phase::Test => self.config.eval_batch_size,
        }
    }

    /// Train windows per epoch under the configured final-batch policy.
    #[must_use]
    pub fn batches_per_epoch(&self) -> usize {
        self.config
            .final_batch
            .windows_per_pass(self.partitions.train.len(), self.config.batch_size)
    }

    /// Next window of identifiers for `phase`.
    ///
    /// Advances the phase cursor. Once a window is flagged final the cursor
    /// wraps to 0, so the next pass starts over.
    pub fn next_batch(&mut self, phase: Phase) -> BatchWindow<S::Id> {
        let ids = self.partitions.get(phase);

        let Some(size) = self.window_size(phase) else {
            self.cursors[phase.index()] = 0;
            return BatchWindow {
                ids: ids.to_vec(),
                is_final: true,
            };
        };

        let len = ids.len();
        let start = self.cursors[phase.index()].min(len);
        let nominal_end = start + size;
        let window = ids[start..nominal_end.min(len)].to_vec();
        let is_final = self.config.final_batch.is_final(nominal_end, size, len);

        self.cursors[phase.index()] = if is_final { 0 } else { nominal_end };

        tracing::debug!(%phase, start, size = window.len(), is_final, "Next batch window");
        BatchWindow {
            ids: window,
            is_final,
        }
    }

    /// Zero all cursors and reshuffle the train partition if shuffling is on.
    /// Validation and test partitions are never reshuffled.
    pub fn reset_epoch(&mut self) {
        if self.config.shuffle {
            shuffle_blocks(
                &mut self.partitions.train,
                self.config.shuffle_block_size,
                &mut self.rng,
            );
        }
        self.cursors = [0; 3];
    }

    /// Fetch records for `ids`, in exactly the order of `ids`.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingRecords` if the store returned fewer records
    /// than requested, `Error::DataFetch` if it returned an id that was not
    /// requested or returned the same id twice, and propagates store failures.
    pub fn fetch(&self, ids: &[S::Id]) -> Result<Vec<S::Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.store.fetch_by_identifiers(ids)?;
        if rows.len() != ids.len() {
            return Err(Error::MissingRecords {
                requested: ids.len(),
                returned: rows.len(),
            });
        }

        let position: FxHashMap<&S::Id, usize> =
            ids.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut slots: Vec<Option<S::Record>> = ids.iter().map(|_| None).collect();
        for (id, record) in rows {
            let Some(&pos) = position.get(&id) else {
                return Err(Error::DataFetch(format!(
                    "store returned unrequested record {id:?}"
                )));
            };
            if slots[pos].replace(record).is_some() {
                return Err(Error::DataFetch(format!(
                    "store returned duplicate record {id:?}"
                )));
            }
        }

        // Equal lengths and no repeats mean every slot is filled.
        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::DataFetch("store response left a request position empty".into()))
    }

    /// Snapshot partitions and cursors.
    #[must_use]
    pub fn state(&self) -> PartitionerState<S::Id> {
        PartitionerState {
            partitions: self.partitions.clone(),
            cursors: self.cursors,
        }
    }

    /// Resume from a previously taken [`state`](Self::state).
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a cursor lies beyond its partition.
    pub fn restore(&mut self, state: PartitionerState<S::Id>) -> Result<()> {
        for phase in Phase::ALL {
            let cursor = state.cursors[phase.index()];
            let len = state.partitions.get(phase).len();
            if cursor > len {
                return Err(Error::Configuration(format!(
                    "{phase} cursor {cursor} exceeds partition size {len}"
                )));
            }
        }
        self.partitions = state.partitions;
        self.cursors = state.cursors;
        Ok(())
    }
}

/// Slice a (shuffled) universe by cumulative ratio.
fn split_universe<I>(mut universe: Vec<I>, config: &PartitionConfig) -> Partitions<I> {
    let n = universe.len();
    let train_end = percent_of(config.split.train(), n);
    let validation_end = (train_end + percent_of(config.split.validation(), n)).min(n);

    let test = universe.split_off(validation_end);
    let validation = universe.split_off(train_end);
    Partitions {
        train: universe,
        validation,
        test,
    }
}

/// `floor(percent * n / 100)` without overflow.
fn percent_of(percent: u32, n: usize) -> usize {
    let scaled = u128::from(percent) * n as u128 / 100;
    usize::try_from(scaled).unwrap_or(n)
}

/// Uniform shuffle (`block_size == 1`) or permutation of contiguous blocks.
///
/// Blocks keep their internal order; a trailing short chunk moves as one
/// block.
fn shuffle_blocks<I, R: rand::Rng>(ids: &mut Vec<I>, block_size: usize, rng: &mut R) {
    if block_size <= 1 {
        ids.shuffle(rng);
        return;
    }

    let mut blocks: Vec<Vec<I>> = Vec::with_capacity(ids.len().div_ceil(block_size));
    let mut rest = std::mem::take(ids);
    while !rest.is_empty() {
        let tail = rest.split_off(block_size.min(rest.len()));
        blocks.push(std::mem::replace(&mut rest, tail));
    }

    blocks.shuffle(rng);
    *ids = blocks.into_iter().flatten().collect();
}
