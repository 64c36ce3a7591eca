use std::time::{Duration, Instant};

use log::info;

use super::{
    DEFAULT_LOSS_GROUPS, LossGroup, Optimizer, Scheduler, SchedulerOrder, TrainModel, total_loss,
};
use crate::{
    Result,
    checkpoint::{Checkpointer, FINAL_TAG, IterationState, checkpoint_tag},
    config::TrainConfig,
    data::DataLoader,
    device::Device,
    dist::Coordinator,
    metrics::{MetricLogger, SmoothedValue},
    reduce::reduce_metrics,
    timer::format_duration,
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What a finished training run went through.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub start_iteration: usize,
    pub last_iteration: usize,
    pub total_time: Duration,
    /// Tags of the checkpoints saved, in order.
    pub checkpoints: Vec<String>,
}

/// Drives the training iterations of a single worker.
pub struct TrainingLoop<M, O, S, K, D> {
    cfg: TrainConfig,
    loss_groups: &'static [LossGroup],
    model: M,
    optimizer: O,
    scheduler: S,
    checkpointer: K,
    device: D,
}

impl<M, O, S, K, D> TrainingLoop<M, O, S, K, D>
where
    M: TrainModel,
    O: Optimizer,
    S: Scheduler,
    K: Checkpointer,
    D: Device,
{
    /// Creates a new `TrainingLoop` summing the default loss groups.
    ///
    /// # Arguments
    /// * `cfg` - The training knobs.
    /// * `model` - The model to train.
    /// * `optimizer` - Applies the gradients of every iteration.
    /// * `scheduler` - Adjusts the learning rate every iteration.
    /// * `checkpointer` - Persists the progress.
    /// * `device` - Where the model runs.
    pub fn new(
        cfg: TrainConfig,
        model: M,
        optimizer: O,
        scheduler: S,
        checkpointer: K,
        device: D,
    ) -> Self {
        Self {
            cfg,
            loss_groups: DEFAULT_LOSS_GROUPS,
            model,
            optimizer,
            scheduler,
            checkpointer,
            device,
        }
    }

    /// Replaces the loss groups summed for display, every forward pass must produce all
    /// their terms.
    pub fn with_loss_groups(mut self, loss_groups: &'static [LossGroup]) -> Self {
        self.loss_groups = loss_groups;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn checkpointer(&self) -> &K {
        &self.checkpointer
    }

    /// Runs every remaining iteration of `loader`.
    ///
    /// Every rank takes part in the loss reduction of every iteration, only the
    /// coordinator logs progress.
    ///
    /// # Arguments
    /// * `coord` - The coordinator of this worker.
    /// * `loader` - Yields the batches after `state.iteration`, its length is the last
    ///   iteration.
    /// * `state` - The progress restored at start, kept up to date and persisted in every
    ///   checkpoint.
    ///
    /// # Errors
    /// Any failure aborts the run, there are no retries.
    pub async fn run<C, L>(
        &mut self,
        coord: &mut C,
        loader: &mut L,
        state: &mut IterationState,
    ) -> Result<TrainSummary>
    where
        C: Coordinator,
        L: DataLoader<Batch = M::Batch>,
    {
        self.device.ensure_available()?;

        let max_iter = loader.len();
        let start_iter = state.iteration;
        info!("start training: start_iter={start_iter} max_iter={max_iter}");

        let mut meters =
            MetricLogger::with_window(self.cfg.delimiter.clone(), self.cfg.window_size);
        let mut checkpoints = Vec::new();
        let mut iteration = start_iter;

        self.model.train_mode();
        let start_training = Instant::now();
        let mut end = Instant::now();

        while let Some(batch) = loader.next_batch() {
            let data_time = end.elapsed();
            iteration += 1;
            state.iteration = iteration;

            if self.cfg.scheduler_order == SchedulerOrder::BeforeOptimizer {
                self.scheduler.step();
            }

            let batch = self.device.stage(batch)?;
            let loss_dict = self.model.forward(batch)?;
            for group in self.loss_groups {
                group.validate(&loss_dict)?;
            }

            // Gradients always come from this worker's own loss.
            let losses = total_loss(&loss_dict);

            if let Some(reduced) = reduce_metrics(coord, &loss_dict).await? {
                meters.update("loss", total_loss(&reduced) as f64);
                for group in self.loss_groups {
                    meters.update(group.name, group.sum(&reduced)? as f64);
                }
                meters.update_many(reduced.iter().map(|(k, v)| (k.as_str(), *v as f64)));
            }

            self.optimizer.zero_grad();
            self.model.backward(losses)?;
            self.optimizer.step()?;

            if self.cfg.scheduler_order == SchedulerOrder::AfterOptimizer {
                self.scheduler.step();
            }

            let batch_time = end.elapsed();
            end = Instant::now();
            meters.update("time", batch_time.as_secs_f64());
            meters.update("data", data_time.as_secs_f64());

            let log_due = iteration % self.cfg.log_period.get() == 0 || iteration == max_iter;
            if coord.is_coordinator() && log_due {
                let line = progress_line(
                    &meters,
                    iteration,
                    max_iter,
                    self.optimizer.learning_rate(),
                    self.device.max_memory_allocated(),
                );
                info!("{line}");
            }

            if iteration % self.cfg.checkpoint_period.get() == 0 {
                let tag = checkpoint_tag(iteration);
                self.checkpointer.save(&tag, state)?;
                checkpoints.push(tag);
            }

            if iteration == max_iter {
                self.checkpointer.save(FINAL_TAG, state)?;
                checkpoints.push(FINAL_TAG.to_string());
            }
        }

        let total_time = start_training.elapsed();
        let ran = (iteration - start_iter).max(1);
        info!(
            "Total training time: {} ({:.4} s / it)",
            format_duration(total_time),
            total_time.as_secs_f64() / ran as f64
        );

        Ok(TrainSummary {
            start_iteration: start_iter,
            last_iteration: iteration,
            total_time,
            checkpoints,
        })
    }
}

/// Estimated time left, from the windowed iteration time.
fn eta(meters: &MetricLogger, iteration: usize, max_iter: usize) -> Duration {
    let per_iter = meters.get("time").map(SmoothedValue::avg).unwrap_or_default();
    let secs = per_iter * max_iter.saturating_sub(iteration) as f64;
    Duration::from_secs(secs as u64)
}

/// Renders the periodic progress line.
fn progress_line(
    meters: &MetricLogger,
    iteration: usize,
    max_iter: usize,
    lr: f32,
    max_mem: Option<u64>,
) -> String {
    let memory = max_mem.map_or(0.0, |bytes| bytes as f64 / BYTES_PER_MB);

    [
        format!("eta: {}", format_duration(eta(meters, iteration, max_iter))),
        format!("iter: {iteration}"),
        meters.to_string(),
        format!("lr: {lr:.6}"),
        format!("max mem: {memory:.0}"),
    ]
    .join(meters.delimiter())
}
