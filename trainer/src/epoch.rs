//! One pass over the shuffled training stream.

use collective::ProcessGroup;
use lm::{Batch, Mode, NceModel};
use log::info;

use crate::{
    CancelToken, Result, SyncSchedule, TrainConfig, TrainMetrics,
    optim::{DenseSgd, clip_grad_norm},
    sparse, sync,
};

/// What one epoch left behind.
#[derive(Debug, Clone, Copy)]
pub struct EpochReport {
    pub batches: usize,
    /// True when the pass stopped early on a cancellation request.
    pub interrupted: bool,
}

/// Drives the per-batch loop: forward/backward, dense clip and step,
/// sparse embedding step, and the cadence synchronization.
///
/// The runner persists across epochs so momentum velocity and the global
/// counters survive epoch boundaries.
pub struct EpochRunner {
    sgd: DenseSgd,
    schedule: SyncSchedule,
    pub metrics: TrainMetrics,
    clip: f32,
    weight_decay: f32,
}

impl EpochRunner {
    pub fn new(cfg: &TrainConfig) -> Self {
        Self {
            sgd: DenseSgd::new(cfg.momentum, cfg.weight_decay),
            schedule: SyncSchedule::new(cfg.log_interval),
            metrics: TrainMetrics::default(),
            clip: cfg.clip,
            weight_decay: cfg.weight_decay,
        }
    }

    /// Runs one epoch at learning rate `lr`.
    ///
    /// Every worker walks its batches in lockstep with the shared cadence,
    /// so all members must see the same number of batches per epoch or the
    /// collective calls stall. The cancellation token is checked between
    /// batches only; a batch in flight always completes.
    ///
    /// # Errors
    /// Propagates model, sparse-update and collective failures; all are
    /// fatal to the run.
    pub async fn run<M: NceModel>(
        &mut self,
        model: &mut M,
        batches: &[Batch],
        lr: f32,
        group: &mut ProcessGroup,
        cancel: &CancelToken,
        epoch: usize,
    ) -> Result<EpochReport> {
        for (index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(epoch = epoch, batch = index; "cancellation requested, leaving epoch");
                return Ok(EpochReport {
                    batches: index,
                    interrupted: true,
                });
            }

            model.zero_grads();
            let loss = model.forward(batch, Mode::Train)?;

            clip_grad_norm(model.dense_grads_mut(), self.clip);
            self.sgd.step(model, lr);

            let sparse_grad = model.take_sparse_grad();
            sparse::apply_step(model.embedding_mut(), &sparse_grad, lr, self.weight_decay)?;

            self.metrics.add_batch(loss, batch.token_count);

            if self.schedule.should_sync(index) {
                sync::sync_dense(group, model).await?;
                self.metrics.bump_sync();

                info!(
                    epoch = epoch,
                    batch = index,
                    total = batches.len(),
                    lr = lr,
                    ppl = self.metrics.interval_ppl();
                    "training progress"
                );
                self.metrics.reset_interval();
            }
        }

        Ok(EpochReport {
            batches: batches.len(),
            interrupted: false,
        })
    }
}
