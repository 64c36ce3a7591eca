use crate::{EngineErr, Result, metrics::MetricDict};

/// A named set of loss terms summed together for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LossGroup {
    pub name: &'static str,
    pub keys: &'static [&'static str],
}

pub const DETECTION_LOSSES: LossGroup = LossGroup {
    name: "loss_det",
    keys: &["loss_cls", "loss_reg", "loss_centerness"],
};

pub const SEGMENTATION_LOSSES: LossGroup = LossGroup {
    name: "loss_seg",
    keys: &["loss_binary_seg", "loss_var", "loss_dist", "loss_mean_reg"],
};

pub const RELATION_LOSSES: LossGroup = LossGroup {
    name: "loss_rel",
    keys: &["loss_edge", "loss_node"],
};

pub const DEFAULT_LOSS_GROUPS: &[LossGroup] =
    &[DETECTION_LOSSES, SEGMENTATION_LOSSES, RELATION_LOSSES];

impl LossGroup {
    /// Checks every term of the group is present in `losses`.
    ///
    /// # Errors
    /// `EngineErr::MissingMetric` naming the first absent term.
    pub fn validate(&self, losses: &MetricDict) -> Result<()> {
        match self.keys.iter().copied().find(|key| !losses.contains_key(*key)) {
            Some(key) => Err(EngineErr::MissingMetric {
                group: self.name,
                key,
            }),
            None => Ok(()),
        }
    }

    /// Sums the terms of the group.
    ///
    /// # Errors
    /// `EngineErr::MissingMetric` if a term is absent, there's no default value.
    pub fn sum(&self, losses: &MetricDict) -> Result<f32> {
        self.keys.iter().copied().try_fold(0.0, |acc, key| {
            losses
                .get(key)
                .map(|v| acc + v)
                .ok_or(EngineErr::MissingMetric {
                    group: self.name,
                    key,
                })
        })
    }
}

/// The sum of every loss term.
pub fn total_loss(losses: &MetricDict) -> f32 {
    losses.values().sum()
}
