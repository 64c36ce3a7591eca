use crate::Result;

/// The rank that receives reductions and consumes merged results.
pub const COORDINATOR_RANK: usize = 0;

/// A worker's view of the process group.
///
/// Every collective blocks until all ranks reach it. All ranks must call the same
/// collectives, the same number of times and in the same order, a rank that skips one
/// stalls the others forever. Never call them behind a rank-local condition.
#[allow(unused)]
#[trait_variant::make(Coordinator: Send)]
pub trait LocalCoordinator {
    /// This worker's 0-based index.
    fn rank(&self) -> usize;

    /// The amount of workers in the group, always at least 1.
    fn world_size(&self) -> usize;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR_RANK
    }

    /// Blocks until every rank has called `barrier`.
    async fn barrier(&mut self) -> Result<()>;

    /// Gathers an opaque payload from every rank.
    ///
    /// # Arguments
    /// * `bytes` - This rank's payload.
    ///
    /// # Returns
    /// `world_size` payloads ordered by rank.
    async fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>>;

    /// Sums `values` elementwise across ranks, delivering the result to `dst` only.
    ///
    /// After the call `values` holds the sum on `dst`, its content on any other rank is
    /// unspecified and must not be read.
    ///
    /// # Arguments
    /// * `values` - This rank's contribution, every rank must pass the same length.
    /// * `dst` - The rank that receives the sum.
    async fn reduce_sum(&mut self, values: &mut [f32], dst: usize) -> Result<()>;
}
