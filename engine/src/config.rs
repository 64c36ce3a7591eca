use std::{
    collections::BTreeMap,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Result, metrics::DEFAULT_WINDOW_SIZE, train::SchedulerOrder};

const DEFAULT_CHECKPOINT_PERIOD: NonZeroUsize = NonZeroUsize::new(2500).unwrap();
const DEFAULT_LOG_PERIOD: NonZeroUsize = NonZeroUsize::new(40).unwrap();

/// Every knob of a training and evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub train: TrainConfig,
    pub test: TestConfig,
    /// Where checkpoints and evaluation outputs are written, nothing is written if unset.
    pub output_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Parses a configuration from its JSON representation, missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// Knobs of the training loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Iterations between two periodic checkpoints.
    pub checkpoint_period: NonZeroUsize,
    /// Iterations between two progress lines.
    pub log_period: NonZeroUsize,
    pub scheduler_order: SchedulerOrder,
    /// Window length of the smoothed metrics.
    pub window_size: NonZeroUsize,
    /// Separator between the fields of a progress line.
    pub delimiter: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            checkpoint_period: DEFAULT_CHECKPOINT_PERIOD,
            log_period: DEFAULT_LOG_PERIOD,
            scheduler_order: SchedulerOrder::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            delimiter: "  ".to_string(),
        }
    }
}

/// Knobs of the evaluation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Whether the model's forward pass is timed on its own.
    pub timed: bool,
    /// Whether the ordered predictions are written to the output folder.
    pub save_predictions: bool,
    /// Whether the augmented forward path is used.
    pub augment: bool,
    /// Named thresholds handed to the evaluator.
    pub thresholds: BTreeMap<String, f32>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timed: true,
            save_predictions: false,
            augment: false,
            thresholds: BTreeMap::from([
                ("iou_thresh_det".to_string(), 0.5),
                ("iou_thresh_seg".to_string(), 0.5),
            ]),
        }
    }
}
