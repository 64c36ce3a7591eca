#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::Path,
    rc::Rc,
};

use engine::{
    Coordinator, EngineErr, InferenceModel, MetricDict, NetCoordinator, Result,
    data::{Batch, Targets},
    infer::Evaluator,
    train::{Optimizer, Scheduler, TrainModel},
};
use tokio::io::{self, DuplexStream, ReadHalf, WriteHalf};

pub const BUF_SIZE: usize = 1 << 16;

pub type DuplexCoordinator = NetCoordinator<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Builds a star of `world_size` coordinators over in-memory links, indexed by rank.
pub async fn group(world_size: usize) -> Result<Vec<DuplexCoordinator>> {
    let mut hub_ends = Vec::with_capacity(world_size - 1);
    let mut spokes = Vec::with_capacity(world_size - 1);

    for rank in 1..world_size {
        let (hub_stream, spoke_stream) = io::duplex(BUF_SIZE);

        let (rx, tx) = io::split(hub_stream);
        hub_ends.push(comms::channel(rx, tx));

        let (rx, tx) = io::split(spoke_stream);
        let (rx, tx) = comms::channel(rx, tx);
        spokes.push(NetCoordinator::spoke(rank, world_size, rx, tx).await?);
    }

    let mut coords = vec![NetCoordinator::hub(world_size, hub_ends).await?];
    coords.extend(spokes);
    Ok(coords)
}

/// A coordinator that records every collective instead of talking to peers.
///
/// Reductions behave as if every rank contributed the same values.
#[derive(Debug, Default)]
pub struct CountingCoordinator {
    pub rank: usize,
    pub world_size: usize,
    pub barriers: usize,
    pub gathers: usize,
    pub reductions: usize,
}

impl CountingCoordinator {
    pub fn new(rank: usize, world_size: usize) -> Self {
        Self {
            rank,
            world_size,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.barriers + self.gathers + self.reductions
    }
}

impl Coordinator for CountingCoordinator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&mut self) -> Result<()> {
        self.barriers += 1;
        Ok(())
    }

    async fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        self.gathers += 1;
        Ok(vec![bytes; self.world_size])
    }

    async fn reduce_sum(&mut self, values: &mut [f32], _dst: usize) -> Result<()> {
        self.reductions += 1;
        let n = self.world_size as f32;
        values.iter_mut().for_each(|v| *v *= n);
        Ok(())
    }
}

pub const ALL_LOSS_KEYS: [&str; 9] = [
    "loss_cls",
    "loss_reg",
    "loss_centerness",
    "loss_binary_seg",
    "loss_var",
    "loss_dist",
    "loss_mean_reg",
    "loss_edge",
    "loss_node",
];

/// Shared record of the calls made by the training capabilities.
pub type CallLog = Rc<RefCell<Vec<String>>>;

pub type TrainBatch = Batch<f32, f32>;

/// Reports every loss term as `inputs / 9`, so the total loss equals the input.
pub struct ToyModel {
    pub log: CallLog,
    pub keys: &'static [&'static str],
    pub train_mode: bool,
}

impl ToyModel {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            keys: &ALL_LOSS_KEYS,
            train_mode: false,
        }
    }
}

impl TrainModel for ToyModel {
    type Batch = TrainBatch;

    fn train_mode(&mut self) {
        self.train_mode = true;
    }

    fn forward(&mut self, batch: TrainBatch) -> Result<MetricDict> {
        self.log.borrow_mut().push("forward".into());
        let term = batch.inputs / ALL_LOSS_KEYS.len() as f32;
        Ok(self.keys.iter().map(|k| (k.to_string(), term)).collect())
    }

    fn backward(&mut self, total_loss: f32) -> Result<()> {
        self.log.borrow_mut().push(format!("backward {total_loss}"));
        Ok(())
    }
}

pub struct ToyOptimizer {
    pub log: CallLog,
    pub lr: f32,
}

impl Optimizer for ToyOptimizer {
    fn zero_grad(&mut self) {
        self.log.borrow_mut().push("zero_grad".into());
    }

    fn step(&mut self) -> Result<()> {
        self.log.borrow_mut().push("step".into());
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

pub struct ToyScheduler {
    pub log: CallLog,
}

impl Scheduler for ToyScheduler {
    fn step(&mut self) {
        self.log.borrow_mut().push("schedule".into());
    }
}

/// `n` single sample batches, each with a total loss of 9.
pub fn train_batches(n: usize) -> Vec<TrainBatch> {
    (0..n)
        .map(|i| Batch {
            inputs: 9.0,
            targets: Targets::default(),
            sample_ids: vec![i as u64],
        })
        .collect()
}

/// Doubles every input.
pub struct Doubler;

impl InferenceModel for Doubler {
    type Input = Vec<u32>;
    type Output = u32;

    fn eval_mode(&mut self) {}

    fn forward(&mut self, inputs: &Vec<u32>) -> Result<Vec<u32>> {
        Ok(inputs.iter().map(|x| x * 2).collect())
    }
}

/// One single sample batch per identifier, inputs equal their identifier.
pub fn eval_batches(ids: impl IntoIterator<Item = u64>) -> Vec<Batch<Vec<u32>>> {
    ids.into_iter()
        .map(|id| Batch::unlabeled(vec![id as u32], vec![id]))
        .collect()
}

/// Keeps what it was asked to evaluate.
#[derive(Default)]
pub struct RecordingEvaluator {
    pub calls: usize,
    pub seen: Vec<u32>,
    pub thresholds: BTreeMap<String, f32>,
}

impl Evaluator<u32> for RecordingEvaluator {
    type Dataset = str;
    type Metrics = usize;

    fn evaluate(
        &mut self,
        dataset: &str,
        predictions: Vec<u32>,
        _output_folder: Option<&Path>,
        thresholds: &BTreeMap<String, f32>,
    ) -> Result<usize> {
        if dataset.is_empty() {
            return Err(EngineErr::IllegalState("unnamed dataset"));
        }

        self.calls += 1;
        self.thresholds = thresholds.clone();
        self.seen = predictions;
        Ok(self.seen.len())
    }
}
