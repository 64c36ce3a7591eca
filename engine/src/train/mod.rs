//! The training loop and the capabilities it drives.

mod losses;
mod training_loop;

use serde::{Deserialize, Serialize};

pub use losses::{
    DEFAULT_LOSS_GROUPS, DETECTION_LOSSES, LossGroup, RELATION_LOSSES, SEGMENTATION_LOSSES,
    total_loss,
};
pub use training_loop::{TrainSummary, TrainingLoop};

use crate::{Result, metrics::MetricDict};

/// A model being trained.
pub trait TrainModel {
    type Batch;

    /// Switches the model to training behavior.
    fn train_mode(&mut self);

    /// Runs the forward pass on a batch already staged on the device.
    ///
    /// # Returns
    /// One entry per named loss term.
    fn forward(&mut self, batch: Self::Batch) -> Result<MetricDict>;

    /// Back propagates the total loss of the last forward pass.
    fn backward(&mut self, total_loss: f32) -> Result<()>;
}

/// Applies gradients to the model parameters.
///
/// Gradient synchronization between workers, if any, happens inside `step`.
pub trait Optimizer {
    fn zero_grad(&mut self);

    fn step(&mut self) -> Result<()>;

    /// The learning rate the next `step` uses.
    fn learning_rate(&self) -> f32;
}

/// Adjusts the learning rate as iterations go by.
pub trait Scheduler {
    fn step(&mut self);
}

/// When the scheduler is stepped relative to the optimizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerOrder {
    /// Right after the iteration counter is bumped, before the forward pass.
    BeforeOptimizer,
    #[default]
    AfterOptimizer,
}
