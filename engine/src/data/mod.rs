mod loader;
mod shard;

pub use loader::InMemoryLoader;
pub use shard::{ShardSpec, shard_range};

/// The three parallel target collections of a training batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets<T> {
    pub detection: Vec<T>,
    pub segmentation: Vec<T>,
    pub relation: Vec<T>,
}

impl<T> Default for Targets<T> {
    fn default() -> Self {
        Self {
            detection: Vec::new(),
            segmentation: Vec::new(),
            relation: Vec::new(),
        }
    }
}

/// A batch of inputs, their targets and the dataset-wide identifier of every sample.
///
/// Evaluation batches leave `targets` empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<I, T = ()> {
    pub inputs: I,
    pub targets: Targets<T>,
    pub sample_ids: Vec<u64>,
}

impl<I, T> Batch<I, T> {
    /// Creates a batch without targets.
    pub fn unlabeled(inputs: I, sample_ids: Vec<u64>) -> Self {
        Self {
            inputs,
            targets: Targets::default(),
            sample_ids,
        }
    }

    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }
}

/// A finite, ordered source of batches.
pub trait DataLoader {
    type Batch;

    /// The total amount of batches in the schedule, already consumed ones included.
    ///
    /// For training this is the iteration the run ends at.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of samples in the underlying dataset, across every shard.
    fn num_samples(&self) -> usize;

    /// Returns the next batch, or `None` once exhausted.
    fn next_batch(&mut self) -> Option<Self::Batch>;
}
