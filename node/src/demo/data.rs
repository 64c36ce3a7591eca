use std::{
    collections::BTreeMap,
    fs,
    path::Path,
};

use engine::{
    Result,
    data::{Batch, Targets},
    infer::Evaluator,
};
use log::warn;

use super::model::{Prediction, TrainBatch};

const PERIOD: u64 = 97;

/// The input and the three targets of sample `id`.
fn sample(id: u64, shift: f32) -> (f32, [f32; 3]) {
    let x = shift + (id % PERIOD) as f32 / PERIOD as f32;
    (x, [2. * x + 1., 0.5 - x, 0.5 * x])
}

/// The training schedule of `rank`, every rank sees different samples in the same
/// amount of iterations.
pub fn train_batches(
    rank: usize,
    world_size: usize,
    iterations: usize,
    batch_size: usize,
) -> Vec<TrainBatch> {
    (0..iterations)
        .map(|it| {
            let first = ((it * world_size + rank) * batch_size) as u64;
            let sample_ids: Vec<u64> = (first..first + batch_size as u64).collect();

            let mut inputs = Vec::with_capacity(batch_size);
            let mut targets = Targets::default();
            for &id in &sample_ids {
                let (x, [det, seg, rel]) = sample(id, 0.);
                inputs.push(x);
                targets.detection.push(det);
                targets.segmentation.push(seg);
                targets.relation.push(rel);
            }

            Batch {
                inputs,
                targets,
                sample_ids,
            }
        })
        .collect()
}

/// Ground truth of an evaluation set, indexed by sample identifier.
#[derive(Debug, Clone)]
pub struct EvalSet {
    targets: Vec<[f32; 3]>,
}

/// Builds an evaluation set of `len` samples with inputs offset by `shift`.
///
/// # Returns
/// The unlabeled batches of the whole set and its ground truth.
pub fn eval_set(len: usize, shift: f32, batch_size: usize) -> (Vec<Batch<Vec<f32>>>, EvalSet) {
    let samples: Vec<_> = (0..len as u64).map(|id| sample(id, shift)).collect();

    let ids: Vec<u64> = (0..len as u64).collect();
    let batches = ids
        .chunks(batch_size.max(1))
        .map(|chunk| {
            let inputs = chunk.iter().map(|&id| samples[id as usize].0).collect();
            Batch::unlabeled(inputs, chunk.to_vec())
        })
        .collect();

    let targets = samples.into_iter().map(|(_, targets)| targets).collect();
    (batches, EvalSet { targets })
}

/// Mean absolute error and hit rate of every head.
///
/// A prediction is a hit when its absolute error is below the head's threshold.
#[derive(Debug, Default)]
pub struct DemoEvaluator;

impl Evaluator<Prediction> for DemoEvaluator {
    type Dataset = EvalSet;
    type Metrics = BTreeMap<String, f32>;

    fn evaluate(
        &mut self,
        dataset: &EvalSet,
        predictions: Vec<Prediction>,
        output_folder: Option<&Path>,
        thresholds: &BTreeMap<String, f32>,
    ) -> Result<BTreeMap<String, f32>> {
        if predictions.len() != dataset.targets.len() {
            warn!(
                "evaluating {} predictions against {} samples",
                predictions.len(),
                dataset.targets.len()
            );
        }

        let threshold = |name: &str| thresholds.get(name).copied().unwrap_or(0.5);
        // Relations are scored with the detection threshold.
        let heads = [
            ("det", threshold("iou_thresh_det")),
            ("seg", threshold("iou_thresh_seg")),
            ("rel", threshold("iou_thresh_det")),
        ];

        let n = predictions.len().min(dataset.targets.len()).max(1) as f32;
        let mut metrics = BTreeMap::new();

        for (idx, (head, thresh)) in heads.into_iter().enumerate() {
            let errors: Vec<f32> = predictions
                .iter()
                .zip(&dataset.targets)
                .map(|(pred, target)| {
                    let value = [pred.det, pred.seg, pred.rel][idx];
                    (value - target[idx]).abs()
                })
                .collect();

            let mae = errors.iter().sum::<f32>() / n;
            let hits = errors.iter().filter(|&&e| e < thresh).count() as f32 / n;

            metrics.insert(format!("mae_{head}"), mae);
            metrics.insert(format!("acc_{head}"), hits);
        }

        if let Some(folder) = output_folder {
            fs::create_dir_all(folder)?;
            fs::write(folder.join("metrics.json"), serde_json::to_vec_pretty(&metrics)?)?;
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_never_share_training_samples() {
        let ids = |rank| -> Vec<u64> {
            train_batches(rank, 2, 3, 4)
                .into_iter()
                .flat_map(|b| b.sample_ids)
                .collect()
        };

        let (a, b) = (ids(0), ids(1));
        assert_eq!(a.len(), 12);
        assert!(a.iter().all(|id| !b.contains(id)));
    }

    #[test]
    fn eval_set_is_batched_in_order() {
        let (batches, set) = eval_set(10, 1., 4);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].sample_ids, [8, 9]);
        assert_eq!(set.targets.len(), 10);
    }

    #[test]
    fn perfect_predictions_score_full_marks() {
        let (_, set) = eval_set(3, 0., 3);
        let predictions = set
            .targets
            .iter()
            .map(|t| Prediction {
                det: t[0],
                seg: t[1],
                rel: t[2],
            })
            .collect();

        let metrics = DemoEvaluator
            .evaluate(&set, predictions, None, &BTreeMap::new())
            .unwrap();

        assert_eq!(metrics["mae_det"], 0.);
        assert_eq!(metrics["acc_seg"], 1.);
        assert_eq!(metrics.len(), 6);
    }
}
