pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod dist;
pub mod error;
pub mod infer;
pub mod metrics;
pub mod reduce;
pub mod timer;
pub mod train;

pub use aggregate::{PartialResultMap, merge_predictions, ordered_predictions};
pub use checkpoint::{Checkpointer, FileCheckpointer, IterationState};
pub use config::{EngineConfig, TestConfig, TrainConfig};
pub use dist::{Coordinator, NetCoordinator, SingleProcess};
pub use error::{EngineErr, Result};
pub use infer::{InferenceLoop, InferenceModel};
pub use metrics::{MetricDict, MetricLogger};
pub use reduce::reduce_metrics;
pub use timer::Timer;
pub use train::{TrainSummary, TrainingLoop};
