use super::{Batch, DataLoader, ShardSpec};

/// A `DataLoader` over batches prepared up front.
#[derive(Debug, Clone)]
pub struct InMemoryLoader<I, T = ()> {
    batches: Vec<Option<Batch<I, T>>>,
    num_samples: usize,
    cursor: usize,
}

impl<I, T> InMemoryLoader<I, T> {
    /// Creates a loader yielding `batches` in order.
    ///
    /// The dataset size is the total amount of sample identifiers in `batches`.
    pub fn new(batches: Vec<Batch<I, T>>) -> Self {
        let num_samples = batches.iter().map(Batch::len).sum();

        Self {
            batches: batches.into_iter().map(Some).collect(),
            num_samples,
            cursor: 0,
        }
    }

    /// Skips the batches already consumed by the first `iteration` iterations.
    pub fn starting_at(mut self, iteration: usize) -> Self {
        let skip = iteration.min(self.batches.len()).max(self.cursor);
        self.batches[self.cursor..skip].fill_with(|| None);
        self.cursor = skip;
        self
    }

    /// Keeps only the contiguous range of batches owned by `shard`.
    ///
    /// The dataset size stays the one of the whole dataset.
    pub fn shard(mut self, shard: ShardSpec) -> Self {
        let range = shard.range(self.batches.len());
        self.batches = self.batches.drain(range).collect();
        self.cursor = 0;
        self
    }
}

impl<I, T> DataLoader for InMemoryLoader<I, T> {
    type Batch = Batch<I, T>;

    fn len(&self) -> usize {
        self.batches.len()
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn next_batch(&mut self) -> Option<Batch<I, T>> {
        let batch = self.batches.get_mut(self.cursor)?.take();
        self.cursor += 1;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(n: u64) -> InMemoryLoader<u64> {
        InMemoryLoader::new(
            (0..n)
                .map(|i| Batch::unlabeled(i, vec![2 * i, 2 * i + 1]))
                .collect(),
        )
    }

    #[test]
    fn yields_every_batch_in_order() {
        let mut dl = loader(3);
        assert_eq!(dl.len(), 3);
        assert_eq!(dl.num_samples(), 6);

        let inputs: Vec<_> = std::iter::from_fn(|| dl.next_batch().map(|b| b.inputs)).collect();
        assert_eq!(inputs, [0, 1, 2]);
        assert!(dl.next_batch().is_none());
    }

    #[test]
    fn resumes_after_consumed_iterations() {
        let mut dl = loader(5).starting_at(3);
        assert_eq!(dl.len(), 5);
        assert_eq!(dl.next_batch().unwrap().inputs, 3);
        assert_eq!(dl.next_batch().unwrap().inputs, 4);
        assert!(dl.next_batch().is_none());

        let mut done = loader(2).starting_at(10);
        assert!(done.next_batch().is_none());
    }

    #[test]
    fn shards_are_contiguous_and_disjoint() {
        let shards: Vec<Vec<u64>> = (0..2)
            .map(|rank| {
                let mut dl = loader(5).shard(ShardSpec::new(rank, 2).unwrap());
                assert_eq!(dl.num_samples(), 10);
                std::iter::from_fn(|| dl.next_batch())
                    .flat_map(|b| b.sample_ids)
                    .collect()
            })
            .collect();

        assert_eq!(shards[0], [0, 1, 2, 3, 4, 5]);
        assert_eq!(shards[1], [6, 7, 8, 9]);
    }
}
