use std::{num::NonZeroUsize, path::PathBuf};

use crate::{Result, TrainErr};

/// Immutable orchestration parameters for one training run.
///
/// Model- and corpus-shape settings live with the binary; this carries
/// what the controller and epoch runner consult every step and epoch.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Best-checkpoint path; epoch snapshots get `.epoch_<n>` appended.
    pub save: PathBuf,
    pub epochs: NonZeroUsize,
    /// Dense synchronization (and progress logging) cadence, in steps.
    pub log_interval: NonZeroUsize,
    pub lr: f32,
    /// Annealing divisor applied after an epoch without improvement.
    pub lr_decay: f32,
    /// Decoupled decay for the sparse embedding rows, coupled decay for
    /// the dense group.
    pub weight_decay: f32,
    pub momentum: f32,
    /// Gradient norm bound for the dense group.
    pub clip: f32,
}

impl TrainConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `TrainErr::InvalidConfig` on values the loop cannot run
    /// with; these are caught before any worker connects.
    pub fn validate(self) -> Result<Self> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(TrainErr::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }

        if !(self.lr_decay.is_finite() && self.lr_decay > 1.0) {
            return Err(TrainErr::InvalidConfig(format!(
                "lr decay must be > 1 so annealing shrinks the rate, got {}",
                self.lr_decay
            )));
        }

        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(TrainErr::InvalidConfig(format!(
                "weight decay must be non-negative, got {}",
                self.weight_decay
            )));
        }

        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainErr::InvalidConfig(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }

        if !(self.clip.is_finite() && self.clip > 0.0) {
            return Err(TrainErr::InvalidConfig(format!(
                "gradient clip bound must be positive, got {}",
                self.clip
            )));
        }

        Ok(self)
    }

    /// Path for the epoch-versioned snapshot, `<save>.epoch_<n>`.
    pub fn epoch_checkpoint_path(&self, epoch: usize) -> PathBuf {
        let mut os = self.save.clone().into_os_string();
        os.push(format!(".epoch_{epoch}"));
        PathBuf::from(os)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TrainConfig {
        TrainConfig {
            save: PathBuf::from("/tmp/model.safetensors"),
            epochs: NonZeroUsize::new(5).unwrap(),
            log_interval: NonZeroUsize::new(200).unwrap(),
            lr: 1.0,
            lr_decay: 2.0,
            weight_decay: 1e-5,
            momentum: 0.9,
            clip: 0.25,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn growing_anneal_factor_is_rejected() {
        let cfg = TrainConfig {
            lr_decay: 0.5,
            ..base()
        };
        assert!(matches!(cfg.validate(), Err(TrainErr::InvalidConfig(_))));
    }

    #[test]
    fn epoch_paths_version_by_suffix() {
        let cfg = base();
        assert_eq!(
            cfg.epoch_checkpoint_path(3),
            PathBuf::from("/tmp/model.safetensors.epoch_3")
        );
    }
}
