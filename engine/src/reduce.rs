//! Averaging of per-worker metric dictionaries, for logging only.

use crate::{
    Result,
    dist::{COORDINATOR_RANK, Coordinator},
    metrics::MetricDict,
};

/// Averages `metrics` across every worker.
///
/// With a single worker the dictionary is returned as is without any collective call.
/// Otherwise every rank must call this with the same key set, values are stacked in key
/// order and summed onto the coordinator.
///
/// # Arguments
/// * `coord` - The coordinator of this worker.
/// * `metrics` - This worker's metrics.
///
/// # Returns
/// `Some` with the mean of every metric on the coordinator, `None` on every other rank:
/// their copy of the reduction is undefined.
pub async fn reduce_metrics<C>(coord: &mut C, metrics: &MetricDict) -> Result<Option<MetricDict>>
where
    C: Coordinator,
{
    let world_size = coord.world_size();
    if world_size < 2 {
        return Ok(Some(metrics.clone()));
    }

    let mut values: Vec<f32> = metrics.values().copied().collect();
    coord.reduce_sum(&mut values, COORDINATOR_RANK).await?;

    if !coord.is_coordinator() {
        return Ok(None);
    }

    let reduced = metrics
        .keys()
        .cloned()
        .zip(values.into_iter().map(|sum| sum / world_size as f32))
        .collect();

    Ok(Some(reduced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::SingleProcess;

    #[tokio::test]
    async fn single_worker_returns_its_input() {
        let metrics = MetricDict::from([
            ("loss_cls".to_string(), 2.0),
            ("loss_reg".to_string(), 0.5),
        ]);

        let reduced = reduce_metrics(&mut SingleProcess, &metrics).await.unwrap();
        assert_eq!(reduced, Some(metrics));
    }

    #[test]
    fn empty_dict_reduces_to_empty() {
        let reduced =
            tokio_test::block_on(reduce_metrics(&mut SingleProcess, &MetricDict::new()));
        assert_eq!(reduced.unwrap(), Some(MetricDict::new()));
    }
}
