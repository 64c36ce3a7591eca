use std::ops::Range;

use crate::{EngineErr, Result};

/// Splits `total` items among `world_size` ranks and returns the shard of `rank`.
///
/// Ranges are contiguous, disjoint, cover `0..total` and differ in size by at most 1.
pub fn shard_range(total: usize, rank: usize, world_size: usize) -> Range<usize> {
    let base = total / world_size;
    let rem = total % world_size;

    let start = rank * base + rank.min(rem);
    let extra = usize::from(rank < rem);

    start..start + base + extra
}

/// The shard owned by a single rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpec {
    rank: usize,
    world_size: usize,
}

impl ShardSpec {
    /// # Errors
    /// `EngineErr::InvalidRank` if `rank` is not in `0..world_size`.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if rank >= world_size {
            return Err(EngineErr::InvalidRank { rank, world_size });
        }

        Ok(Self { rank, world_size })
    }

    pub fn rank(self) -> usize {
        self.rank
    }

    pub fn world_size(self) -> usize {
        self.world_size
    }

    pub fn range(self, total: usize) -> Range<usize> {
        shard_range(total, self.rank, self.world_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_range_balanced() {
        // total 10, ranks 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    #[test]
    fn more_ranks_than_items() {
        assert_eq!(shard_range(2, 0, 4), 0..1);
        assert_eq!(shard_range(2, 1, 4), 1..2);
        assert_eq!(shard_range(2, 3, 4), 2..2);
    }

    #[test]
    fn out_of_range_rank_is_rejected() {
        assert!(ShardSpec::new(3, 3).is_err());
        assert_eq!(ShardSpec::new(1, 3).unwrap().range(10), 4..7);
    }
}
