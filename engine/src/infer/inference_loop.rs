use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
    time::Duration,
};

use log::info;
use serde::{Serialize, de::DeserializeOwned};

use super::{Evaluator, ForwardPath, InferenceModel};
use crate::{
    EngineErr, Result,
    aggregate::{PartialResultMap, merge_predictions, ordered_predictions},
    config::TestConfig,
    data::{Batch, DataLoader},
    device::Device,
    dist::Coordinator,
    timer::{Timer, format_duration},
};

/// The file the ordered predictions are written to when enabled.
pub const PREDICTIONS_FILE: &str = "predictions.json";

/// Drives the evaluation of a dataset sharded across every worker.
pub struct InferenceLoop<M, D>
where
    M: InferenceModel,
{
    cfg: TestConfig,
    model: M,
    path: ForwardPath<M::Input, M::Output>,
    device: D,
}

impl<M, D> InferenceLoop<M, D>
where
    M: InferenceModel,
    D: Device,
{
    /// Creates a new `InferenceLoop` using the plain forward path.
    pub fn new(cfg: TestConfig, model: M, device: D) -> Self {
        Self {
            cfg,
            model,
            path: ForwardPath::Plain,
            device,
        }
    }

    /// Replaces the forward path, see `ForwardPath::Augmented`.
    pub fn with_forward_path(mut self, path: ForwardPath<M::Input, M::Output>) -> Self {
        self.path = path;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Runs the model on every batch of `loader`.
    ///
    /// # Arguments
    /// * `loader` - This worker's shard of the dataset.
    /// * `timer` - If given, times every forward pass, staging on the device included.
    ///
    /// # Returns
    /// This worker's results keyed by sample identifier.
    ///
    /// # Errors
    /// Fails if the model yields a different amount of outputs than there are samples.
    pub fn compute_on_dataset<L>(
        &mut self,
        loader: &mut L,
        mut timer: Option<&mut Timer>,
    ) -> Result<PartialResultMap<M::Output>>
    where
        L: DataLoader<Batch = Batch<M::Input>>,
    {
        self.model.eval_mode();
        let mut results = PartialResultMap::new();

        while let Some(batch) = loader.next_batch() {
            if let Some(timer) = timer.as_deref_mut() {
                timer.tic();
            }

            let batch = self.device.stage(batch)?;
            let outputs = self.path.forward(&mut self.model, &batch.inputs)?;

            if let Some(timer) = timer.as_deref_mut() {
                self.device.synchronize()?;
                timer.toc()?;
            }

            if outputs.len() != batch.sample_ids.len() {
                return Err(EngineErr::LengthMismatch {
                    what: "model outputs",
                    got: outputs.len(),
                    expected: batch.sample_ids.len(),
                });
            }

            results.extend(batch.sample_ids.into_iter().zip(outputs));
        }

        Ok(results)
    }

    /// Evaluates the model on a dataset.
    ///
    /// Every rank computes its shard, waits for the others and hands its results to the
    /// coordinator, which orders them and runs the evaluator once.
    ///
    /// # Arguments
    /// * `coord` - The coordinator of this worker.
    /// * `dataset_name` - Shown in the logs.
    /// * `loader` - This worker's shard of the dataset.
    /// * `evaluator` - Scores the gathered predictions.
    /// * `dataset` - Handed to the evaluator.
    /// * `output_folder` - Where predictions and evaluation artifacts go, if anywhere.
    ///
    /// # Returns
    /// The evaluator's metrics on the coordinator, `None` on every other rank.
    pub async fn run<C, L, E>(
        &mut self,
        coord: &mut C,
        dataset_name: &str,
        loader: &mut L,
        evaluator: &mut E,
        dataset: &E::Dataset,
        output_folder: Option<&Path>,
    ) -> Result<Option<E::Metrics>>
    where
        C: Coordinator,
        L: DataLoader<Batch = Batch<M::Input>>,
        E: Evaluator<M::Output>,
        M::Output: Serialize + DeserializeOwned + Send + Sync,
    {
        self.device.ensure_available()?;

        let num_samples = loader.num_samples();
        let num_devices = coord.world_size();
        info!("Start evaluation on {dataset_name} dataset({num_samples} images).");

        let mut total_timer = Timer::new();
        let mut inference_timer = Timer::new();

        total_timer.tic();
        let timer = self.cfg.timed.then_some(&mut inference_timer);
        let results = self.compute_on_dataset(loader, timer)?;

        // Every shard must be done before the run time is meaningful.
        coord.barrier().await?;
        let total_time = total_timer.toc()?;

        info!(
            "Total run time: {} ({:.6} s / img per device, on {num_devices} devices)",
            format_duration(total_time),
            per_image(total_time, num_samples, num_devices),
        );

        if self.cfg.timed {
            let inference_time = inference_timer.total_time();
            info!(
                "Model inference time: {} ({:.6} s / img per device, on {num_devices} devices, {:.2} img / s)",
                format_duration(inference_time),
                per_image(inference_time, num_samples, num_devices),
                images_per_second(inference_time, num_samples),
            );
        }

        let Some(merged) = merge_predictions(coord, results).await? else {
            return Ok(None);
        };
        let predictions = ordered_predictions(merged);

        if let Some(folder) = output_folder.filter(|_| self.cfg.save_predictions) {
            save_predictions(folder, &predictions)?;
        }

        evaluator
            .evaluate(dataset, predictions, output_folder, &self.cfg.thresholds)
            .map(Some)
    }
}

/// Seconds spent per sample by each device.
fn per_image(time: Duration, num_samples: usize, num_devices: usize) -> f64 {
    time.as_secs_f64() * num_devices as f64 / num_samples.max(1) as f64
}

fn images_per_second(time: Duration, num_samples: usize) -> f64 {
    let secs = time.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }

    num_samples as f64 / secs
}

fn save_predictions<R: Serialize>(folder: &Path, predictions: &[R]) -> Result<()> {
    fs::create_dir_all(folder)?;

    let path = folder.join(PREDICTIONS_FILE);
    info!("saving predictions to {}", path.display());

    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, predictions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_image_scales_with_devices() {
        let time = Duration::from_secs(10);
        assert_eq!(per_image(time, 100, 1), 0.1);
        assert_eq!(per_image(time, 100, 4), 0.4);
        assert_eq!(per_image(time, 0, 1), 10.0);
    }

    #[test]
    fn throughput_of_nothing_is_zero() {
        assert_eq!(images_per_second(Duration::ZERO, 10), 0.0);
        assert_eq!(images_per_second(Duration::from_secs(2), 10), 5.0);
    }
}
