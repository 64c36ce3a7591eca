//! Merging of the per-worker prediction shards into a single ordered sequence.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    Result,
    dist::{self, Coordinator},
};

/// Results keyed by sample identifier, as produced by a single worker.
pub type PartialResultMap<R> = BTreeMap<u64, R>;

/// Collects every worker's partial results on the coordinator.
///
/// With a single worker the local map is returned without any collective call.
///
/// # Arguments
/// * `coord` - The coordinator of this worker.
/// * `local` - The results computed by this worker.
///
/// # Returns
/// `Some` with the union of every worker's results on the coordinator, `None` on every
/// other rank.
pub async fn merge_predictions<C, R>(
    coord: &mut C,
    local: PartialResultMap<R>,
) -> Result<Option<PartialResultMap<R>>>
where
    C: Coordinator,
    R: Serialize + DeserializeOwned + Send + Sync,
{
    if coord.world_size() < 2 {
        return Ok(Some(local));
    }

    let gathered = dist::all_gather(coord, &local).await?;

    if !coord.is_coordinator() {
        return Ok(None);
    }

    Ok(Some(union(gathered)))
}

/// Key-wise union of `parts`, a later part wins over an earlier one on duplicated keys.
pub fn union<R, I>(parts: I) -> PartialResultMap<R>
where
    I: IntoIterator<Item = PartialResultMap<R>>,
{
    let mut merged = PartialResultMap::new();

    for part in parts {
        for (id, result) in part {
            if merged.insert(id, result).is_some() {
                debug!(sample_id = id; "sample gathered from more than one worker");
            }
        }
    }

    merged
}

/// Turns the merged results into a sequence ordered by sample identifier.
///
/// The sequence has one entry per collected identifier. Gaps in the identifiers are
/// reported but not filled, so positions after a gap no longer match the identifier.
pub fn ordered_predictions<R>(merged: PartialResultMap<R>) -> Vec<R> {
    if !is_contiguous(&merged) {
        warn!(
            "gathered identifiers are not contiguous; some samples may be missing from evaluation"
        );
    }

    merged.into_values().collect()
}

/// Whether the keys of `merged` are exactly `0..merged.len()`.
pub fn is_contiguous<R>(merged: &PartialResultMap<R>) -> bool {
    match merged.last_key_value() {
        Some((&max, _)) => max.checked_add(1) == Some(merged.len() as u64),
        None => true,
    }
}
