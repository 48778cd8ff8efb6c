//! The outer training loop: epochs, validation, model selection.

use collective::ProcessGroup;
use lm::{Corpus, NceModel};
use log::{info, warn};
use rand::Rng;

use crate::{
    CancelToken, EpochRunner, Result, Selection, TrainConfig, TrainingState, checkpoint, evaluate,
};

/// Owns one worker's model and run state and drives it to completion.
///
/// Per epoch: shuffle, run the batch loop, score the validation stream
/// with the exact softmax, then either keep a new best checkpoint or
/// anneal the learning rate. An epoch-versioned snapshot is written either
/// way, so any epoch can be inspected after the run.
pub struct TrainingController<M: NceModel> {
    cfg: TrainConfig,
    model: M,
    state: TrainingState,
    runner: EpochRunner,
    cancel: CancelToken,
}

impl<M: NceModel> TrainingController<M> {
    pub fn new(cfg: TrainConfig, model: M, cancel: CancelToken) -> Self {
        let state = TrainingState::new(cfg.lr);
        let runner = EpochRunner::new(&cfg);
        Self {
            cfg,
            model,
            state,
            runner,
            cancel,
        }
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs the configured number of epochs and returns the test-stream
    /// perplexity of the model as it stands when training ends.
    ///
    /// A cancellation request stops the run at the next batch boundary;
    /// the epochs finished so far keep their checkpoints and the test
    /// evaluation still runs, mirroring an uninterrupted exit.
    ///
    /// # Errors
    /// Model, checkpoint and collective failures all abort the run.
    pub async fn train<R: Rng>(
        &mut self,
        corpus: &mut Corpus,
        group: &mut ProcessGroup,
        rng: &mut R,
    ) -> Result<f64> {
        for epoch in 1..=self.cfg.epochs.get() {
            corpus.shuffle_train(rng);
            self.state.epoch = epoch;

            let report = self
                .runner
                .run(
                    &mut self.model,
                    &corpus.train,
                    self.state.lr,
                    group,
                    &self.cancel,
                    epoch,
                )
                .await?;

            if report.interrupted {
                warn!(epoch = epoch, batches = report.batches; "run interrupted mid-epoch");
                break;
            }

            let val_ppl = evaluate(&mut self.model, &corpus.valid)?;
            info!(
                epoch = epoch,
                val_ppl = val_ppl,
                batches = report.batches,
                tokens = self.runner.metrics.tokens;
                "epoch complete"
            );

            match self.state.select(val_ppl, self.cfg.lr_decay) {
                Selection::Improved => {
                    self.state.best_path = Some(self.cfg.save.clone());
                    checkpoint::save(&self.cfg.save, &self.model, &self.state)?;
                    info!(epoch = epoch, val_ppl = val_ppl; "new best model kept");
                }
                Selection::Annealed => {
                    info!(epoch = epoch, lr = self.state.lr; "no improvement, learning rate annealed");
                }
            }

            checkpoint::save(
                &self.cfg.epoch_checkpoint_path(epoch),
                &self.model,
                &self.state,
            )?;

            if self.cancel.is_cancelled() {
                warn!(epoch = epoch; "run interrupted at epoch boundary");
                break;
            }
        }

        let test_ppl = evaluate(&mut self.model, &corpus.test)?;
        info!(test_ppl = test_ppl, syncs = self.runner.metrics.syncs; "training finished");
        Ok(test_ppl)
    }

    /// Restores the best checkpoint from disk and scores the test stream.
    ///
    /// # Errors
    /// A missing or malformed checkpoint is fatal; there is no fallback to
    /// the in-memory weights.
    pub fn evaluate_best(&mut self, corpus: &Corpus) -> Result<f64> {
        self.state = checkpoint::load(&self.cfg.save, &mut self.model)?;
        let test_ppl = evaluate(&mut self.model, &corpus.test)?;
        info!(
            epoch = self.state.epoch,
            test_ppl = test_ppl;
            "best checkpoint evaluated"
        );
        Ok(test_ppl)
    }
}
