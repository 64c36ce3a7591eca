//! Rank queries and the blocking collectives every worker takes part in.

mod coordinator;
mod net;
mod single;

use serde::{Serialize, de::DeserializeOwned};

pub use coordinator::{COORDINATOR_RANK, Coordinator};
pub use net::NetCoordinator;
pub use single::SingleProcess;

use crate::Result;

/// Gathers one `value` per rank, bincode encoded on the wire.
///
/// The encoding is lossless, non finite floats arrive as they were sent. It is not self
/// describing, so `T` can't rely on `deserialize_any` (`#[serde(flatten)]`, untagged
/// enums, `serde_json::Value`); gather those as their JSON text instead.
///
/// # Arguments
/// * `coord` - The coordinator of this worker.
/// * `value` - This worker's contribution.
///
/// # Returns
/// Every rank's value ordered by rank, this worker's own included.
pub async fn all_gather<C, T>(coord: &mut C, value: &T) -> Result<Vec<T>>
where
    C: Coordinator,
    T: Serialize + DeserializeOwned + Sync,
{
    let bytes = bincode::serialize(value)?;
    let gathered = coord.all_gather(bytes).await?;

    gathered
        .iter()
        .map(|bytes| bincode::deserialize(bytes).map_err(Into::into))
        .collect()
}
