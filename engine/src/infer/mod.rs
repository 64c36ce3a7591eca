//! The evaluation loop and the capabilities it drives.

mod forward;
mod inference_loop;

use std::{collections::BTreeMap, path::Path};

pub use forward::{Augmentation, ForwardPath};
pub use inference_loop::{InferenceLoop, PREDICTIONS_FILE};

use crate::Result;

/// A model being evaluated.
pub trait InferenceModel {
    type Input;
    type Output;

    /// Switches the model to evaluation behavior.
    fn eval_mode(&mut self);

    /// Runs the forward pass on the inputs of a batch.
    ///
    /// # Returns
    /// One output per sample, in the order of the batch.
    fn forward(&mut self, inputs: &Self::Input) -> Result<Vec<Self::Output>>;
}

/// Scores the ordered predictions of a whole dataset.
pub trait Evaluator<R> {
    type Dataset: ?Sized;
    type Metrics;

    /// Evaluates `predictions`, called once per dataset and only on the coordinator.
    ///
    /// # Arguments
    /// * `dataset` - The dataset the predictions were computed on.
    /// * `predictions` - One prediction per gathered sample, ordered by identifier.
    /// * `output_folder` - Where evaluation artifacts may be written.
    /// * `thresholds` - Named thresholds from the configuration.
    fn evaluate(
        &mut self,
        dataset: &Self::Dataset,
        predictions: Vec<R>,
        output_folder: Option<&Path>,
        thresholds: &BTreeMap<String, f32>,
    ) -> Result<Self::Metrics>;
}
