use super::InferenceModel;
use crate::{EngineErr, Result};

type ViewFn<I> = Box<dyn Fn(&I) -> I + Send + Sync>;
type CombineFn<O> = Box<dyn Fn(Vec<O>) -> O + Send + Sync>;

/// How the model is applied to the inputs of a batch.
pub enum ForwardPath<I, O> {
    /// A single forward pass on the inputs as they are.
    Plain,
    /// Several forward passes on transformed views, merged per sample.
    Augmented(Augmentation<I, O>),
}

impl<I, O> ForwardPath<I, O> {
    /// Computes one output per sample of `inputs`.
    ///
    /// # Errors
    /// Fails if the model fails or if two views yield a different amount of outputs.
    pub fn forward<M>(&self, model: &mut M, inputs: &I) -> Result<Vec<O>>
    where
        M: InferenceModel<Input = I, Output = O>,
    {
        match self {
            ForwardPath::Plain => model.forward(inputs),
            ForwardPath::Augmented(aug) => aug.forward(model, inputs),
        }
    }
}

/// Test time augmentation: the untransformed inputs plus every registered view go
/// through the model, the outputs of each sample are then combined into one.
pub struct Augmentation<I, O> {
    views: Vec<ViewFn<I>>,
    combine: CombineFn<O>,
}

impl<I, O> Augmentation<I, O> {
    /// Creates a new `Augmentation` without extra views.
    ///
    /// # Arguments
    /// * `combine` - Merges the outputs of every view for one sample, the untransformed
    ///   one comes first.
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(Vec<O>) -> O + Send + Sync + 'static,
    {
        Self {
            views: Vec::new(),
            combine: Box::new(combine),
        }
    }

    /// Adds a transformed view of the inputs.
    pub fn view<F>(mut self, transform: F) -> Self
    where
        F: Fn(&I) -> I + Send + Sync + 'static,
    {
        self.views.push(Box::new(transform));
        self
    }

    /// The amount of forward passes per batch.
    pub fn passes(&self) -> usize {
        self.views.len() + 1
    }

    fn forward<M>(&self, model: &mut M, inputs: &I) -> Result<Vec<O>>
    where
        M: InferenceModel<Input = I, Output = O>,
    {
        let base = model.forward(inputs)?;
        let n = base.len();

        let mut per_sample: Vec<Vec<O>> = base
            .into_iter()
            .map(|out| {
                let mut outs = Vec::with_capacity(self.passes());
                outs.push(out);
                outs
            })
            .collect();

        for transform in &self.views {
            let outputs = model.forward(&transform(inputs))?;
            if outputs.len() != n {
                return Err(EngineErr::LengthMismatch {
                    what: "augmented view outputs",
                    got: outputs.len(),
                    expected: n,
                });
            }

            for (outs, out) in per_sample.iter_mut().zip(outputs) {
                outs.push(out);
            }
        }

        Ok(per_sample.into_iter().map(|outs| (self.combine)(outs)).collect())
    }
}
