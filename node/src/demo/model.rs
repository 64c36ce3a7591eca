use std::sync::Arc;

use engine::{
    EngineErr, InferenceModel, MetricDict, Result,
    data::Batch,
    train::{Optimizer, Scheduler, TrainModel},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const HEADS: usize = 3;
const DET: usize = 0;
const SEG: usize = 1;
const REL: usize = 2;

const WEIGHT_DECAY: f32 = 0.01;

pub type TrainBatch = Batch<Vec<f32>, f32>;

/// A scalar linear regressor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub w: f32,
    pub b: f32,
}

impl Head {
    fn predict(&self, x: f32) -> f32 {
        self.w * x + self.b
    }
}

/// What gets persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub heads: [Head; HEADS],
    pub lr: f32,
}

/// Parameters, accumulated gradients and learning rate, shared by the model, the
/// optimizer and the scheduler.
#[derive(Debug)]
pub struct Params {
    heads: [Head; HEADS],
    grads: [[f32; 2]; HEADS],
    lr: f32,
}

pub type SharedParams = Arc<Mutex<Params>>;

impl Params {
    pub fn shared(lr: f32) -> SharedParams {
        Arc::new(Mutex::new(Self {
            heads: [Head::default(); HEADS],
            grads: [[0.; 2]; HEADS],
            lr,
        }))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            heads: self.heads,
            lr: self.lr,
        }
    }

    pub fn restore(&mut self, snapshot: Snapshot) {
        self.heads = snapshot.heads;
        self.lr = snapshot.lr;
    }
}

/// Per head statistics of a forward pass.
struct Fit {
    mse: f32,
    mae: f32,
    var: f32,
    grad: [f32; 2],
}

fn fit(head: &Head, xs: &[f32], ys: &[f32]) -> Result<Fit> {
    if xs.len() != ys.len() {
        return Err(EngineErr::LengthMismatch {
            what: "targets",
            got: ys.len(),
            expected: xs.len(),
        });
    }

    let n = xs.len().max(1) as f32;
    let residuals: Vec<f32> = xs.iter().zip(ys).map(|(&x, &y)| head.predict(x) - y).collect();

    let mean = residuals.iter().sum::<f32>() / n;
    let mse = residuals.iter().map(|r| r * r).sum::<f32>() / n;
    let mae = residuals.iter().map(|r| r.abs()).sum::<f32>() / n;
    let var = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n;
    let dw = 2. * residuals.iter().zip(xs).map(|(r, x)| r * x).sum::<f32>() / n;

    Ok(Fit {
        mse,
        mae,
        var,
        grad: [dw, 2. * mean],
    })
}

/// Three linear heads fitted to the detection, segmentation and relation targets.
pub struct ToyModel {
    params: SharedParams,
    pending: [[f32; 2]; HEADS],
    training: bool,
}

impl ToyModel {
    pub fn new(params: SharedParams) -> Self {
        Self {
            params,
            pending: [[0.; 2]; HEADS],
            training: false,
        }
    }
}

impl TrainModel for ToyModel {
    type Batch = TrainBatch;

    fn train_mode(&mut self) {
        self.training = true;
    }

    fn forward(&mut self, batch: TrainBatch) -> Result<MetricDict> {
        let heads = self.params.lock().heads;
        let xs = &batch.inputs;
        let targets = &batch.targets;

        let det = fit(&heads[DET], xs, &targets.detection)?;
        let seg = fit(&heads[SEG], xs, &targets.segmentation)?;
        let rel = fit(&heads[REL], xs, &targets.relation)?;

        let det_decay = WEIGHT_DECAY * heads[DET].w.powi(2);
        let seg_decay = WEIGHT_DECAY * heads[SEG].w.powi(2);

        self.pending = [det.grad, seg.grad, rel.grad];
        self.pending[DET][0] += 2. * WEIGHT_DECAY * heads[DET].w;
        self.pending[SEG][0] += 2. * WEIGHT_DECAY * heads[SEG].w;

        let losses = [
            ("loss_cls", det.mse),
            ("loss_reg", det.mae),
            ("loss_centerness", det_decay),
            ("loss_binary_seg", seg.mse),
            ("loss_var", seg.var),
            ("loss_dist", seg.mae),
            ("loss_mean_reg", seg_decay),
            ("loss_edge", rel.mse),
            ("loss_node", rel.mae),
        ];

        Ok(losses.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    fn backward(&mut self, total_loss: f32) -> Result<()> {
        if !total_loss.is_finite() {
            return Err(EngineErr::external(format!("loss diverged: {total_loss}")));
        }

        let mut params = self.params.lock();
        for (acc, pending) in params.grads.iter_mut().zip(self.pending) {
            acc[0] += pending[0];
            acc[1] += pending[1];
        }

        Ok(())
    }
}

/// Plain stochastic gradient descent.
pub struct Sgd {
    params: SharedParams,
}

impl Sgd {
    pub fn new(params: SharedParams) -> Self {
        Self { params }
    }
}

impl Optimizer for Sgd {
    fn zero_grad(&mut self) {
        self.params.lock().grads = [[0.; 2]; HEADS];
    }

    fn step(&mut self) -> Result<()> {
        let mut params = self.params.lock();
        let Params { heads, grads, lr } = &mut *params;

        for (head, grad) in heads.iter_mut().zip(grads.iter()) {
            head.w -= *lr * grad[0];
            head.b -= *lr * grad[1];
        }

        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.params.lock().lr
    }
}

/// Decays the learning rate by `gamma` every `step_size` steps.
pub struct StepLr {
    params: SharedParams,
    step_size: usize,
    gamma: f32,
    steps: usize,
}

impl StepLr {
    /// # Arguments
    /// * `params` - Holds the learning rate being decayed.
    /// * `step_size` - Steps between two decays.
    /// * `gamma` - The decay factor.
    /// * `steps` - Steps already taken, when resuming.
    pub fn new(params: SharedParams, step_size: usize, gamma: f32, steps: usize) -> Self {
        Self {
            params,
            step_size: step_size.max(1),
            gamma,
            steps,
        }
    }
}

impl Scheduler for StepLr {
    fn step(&mut self) {
        self.steps += 1;
        if self.steps % self.step_size == 0 {
            self.params.lock().lr *= self.gamma;
        }
    }
}

/// The output of every head for a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub det: f32,
    pub seg: f32,
    pub rel: f32,
}

impl Prediction {
    pub fn mean(preds: Vec<Prediction>) -> Prediction {
        let n = preds.len().max(1) as f32;
        let sum = preds.iter().fold([0.; HEADS], |acc, p| {
            [acc[0] + p.det, acc[1] + p.seg, acc[2] + p.rel]
        });

        Prediction {
            det: sum[DET] / n,
            seg: sum[SEG] / n,
            rel: sum[REL] / n,
        }
    }
}

/// Evaluation view of the shared parameters.
pub struct Predictor {
    params: SharedParams,
}

impl Predictor {
    pub fn new(params: SharedParams) -> Self {
        Self { params }
    }
}

impl InferenceModel for Predictor {
    type Input = Vec<f32>;
    type Output = Prediction;

    fn eval_mode(&mut self) {}

    fn forward(&mut self, inputs: &Vec<f32>) -> Result<Vec<Prediction>> {
        let heads = self.params.lock().heads;

        Ok(inputs
            .iter()
            .map(|&x| Prediction {
                det: heads[DET].predict(x),
                seg: heads[SEG].predict(x),
                rel: heads[REL].predict(x),
            })
            .collect())
    }
}
