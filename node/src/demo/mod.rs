//! A toy workload exercising training, checkpointing and multi-dataset evaluation.

mod data;
mod model;

use std::path::PathBuf;

use engine::{
    Coordinator, EngineConfig, FileCheckpointer, InferenceLoop, IterationState, Result,
    TrainingLoop,
    checkpoint::Checkpointer,
    data::{InMemoryLoader, ShardSpec},
    device::Cpu,
    dist::{self, COORDINATOR_RANK},
    infer::{Augmentation, ForwardPath},
};
use log::info;

use data::{DemoEvaluator, eval_set, train_batches};
use model::{Params, Prediction, Predictor, SharedParams, Sgd, Snapshot, StepLr, ToyModel};

const ITERATIONS: usize = 200;
const BATCH_SIZE: usize = 8;
const BASE_LR: f32 = 0.1;
const LR_STEP: usize = 80;
const LR_GAMMA: f32 = 0.5;
const JITTER: f32 = 0.01;

const EVAL_LEN: usize = 60;
const EVAL_SETS: [(&str, f32); 2] = [("demo_val", 0.), ("demo_shifted", 1.)];

const SNAPSHOT_KEY: &str = "params";

/// Saves the parameters along with the iteration state.
struct DemoCheckpointer {
    inner: FileCheckpointer,
    params: SharedParams,
}

impl DemoCheckpointer {
    /// Loads the last checkpoint, if resuming is possible at all.
    fn load(&self, resume: bool) -> Result<IterationState> {
        if !resume {
            return Ok(IterationState::default());
        }

        Ok(self.inner.load_last()?.unwrap_or_default())
    }

    fn restore(&self, state: &IterationState) -> Result<()> {
        if let Some(value) = state.extra.get(SNAPSHOT_KEY) {
            let snapshot: Snapshot = serde_json::from_value(value.clone())?;
            self.params.lock().restore(snapshot);
            info!("resuming from iteration {}", state.iteration);
        }

        Ok(())
    }
}

impl Checkpointer for DemoCheckpointer {
    fn save(&mut self, tag: &str, state: &IterationState) -> Result<()> {
        let mut state = state.clone();
        let snapshot = self.params.lock().snapshot();
        state
            .extra
            .insert(SNAPSHOT_KEY.to_string(), serde_json::to_value(snapshot)?);

        self.inner.save(tag, &state)
    }
}

/// Trains the toy model and evaluates it on every demo dataset.
///
/// # Arguments
/// * `coord` - The coordinator of this worker.
/// * `cfg` - The run configuration, checkpoints and evaluation outputs go to its
///   `output_dir`.
pub async fn run<C: Coordinator>(coord: &mut C, cfg: &EngineConfig) -> Result<()> {
    let (rank, world_size) = (coord.rank(), coord.world_size());
    let params = Params::shared(BASE_LR);

    let checkpointer = DemoCheckpointer {
        inner: FileCheckpointer::new(
            cfg.output_dir.clone().unwrap_or_default(),
            coord.is_coordinator() && cfg.output_dir.is_some(),
        ),
        params: params.clone(),
    };

    // Every rank resumes from whatever the coordinator found.
    let local = checkpointer.load(cfg.output_dir.is_some())?;
    // The state's extra map is only readable from a self describing format.
    let text = dist::all_gather(coord, &serde_json::to_string(&local)?)
        .await?
        .swap_remove(COORDINATOR_RANK);
    let mut state: IterationState = serde_json::from_str(&text)?;
    checkpointer.restore(&state)?;

    let mut loader = InMemoryLoader::new(train_batches(rank, world_size, ITERATIONS, BATCH_SIZE))
        .starting_at(state.iteration);

    let mut trainer = TrainingLoop::new(
        cfg.train.clone(),
        ToyModel::new(params.clone()),
        Sgd::new(params.clone()),
        StepLr::new(params.clone(), LR_STEP, LR_GAMMA, state.iteration),
        checkpointer,
        Cpu,
    );
    trainer.run(coord, &mut loader, &mut state).await?;

    let mut evaluator = InferenceLoop::new(cfg.test.clone(), Predictor::new(params), Cpu);
    if cfg.test.augment {
        evaluator = evaluator.with_forward_path(jittered());
    }

    let shard = ShardSpec::new(rank, world_size)?;
    for (name, shift) in EVAL_SETS {
        let (batches, dataset) = eval_set(EVAL_LEN, shift, BATCH_SIZE);
        let mut loader = InMemoryLoader::new(batches).shard(shard);
        let output_folder = inference_folder(cfg, name);

        let metrics = evaluator
            .run(
                coord,
                name,
                &mut loader,
                &mut DemoEvaluator,
                &dataset,
                output_folder.as_deref(),
            )
            .await?;

        if let Some(metrics) = metrics {
            info!("{name}: {metrics:?}");
        }

        coord.barrier().await?;
    }

    Ok(())
}

fn inference_folder(cfg: &EngineConfig, dataset_name: &str) -> Option<PathBuf> {
    let dir = cfg.output_dir.as_ref()?;
    Some(dir.join("inference").join(dataset_name))
}

/// Averages the predictions on slightly shifted copies of the inputs.
fn jittered() -> ForwardPath<Vec<f32>, Prediction> {
    ForwardPath::Augmented(
        Augmentation::new(Prediction::mean)
            .view(shifted(JITTER))
            .view(shifted(-JITTER)),
    )
}

fn shifted(delta: f32) -> impl Fn(&Vec<f32>) -> Vec<f32> + Send + Sync + 'static {
    move |xs| xs.iter().map(|x| x + delta).collect()
}
