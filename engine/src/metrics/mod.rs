mod logger;
mod smoothed;

use std::collections::BTreeMap;

pub use logger::MetricLogger;
pub use smoothed::{DEFAULT_WINDOW_SIZE, SmoothedValue};

/// Named scalar metrics produced by a single iteration.
///
/// Ordered by key so every worker stacks the values in the same order.
pub type MetricDict = BTreeMap<String, f32>;
