use std::path::PathBuf;

/// Outcome of the per-epoch model selection step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Validation perplexity improved; a best checkpoint should be kept.
    Improved,
    /// No improvement; the learning rate was annealed instead.
    Annealed,
}

/// Mutable run state, updated by the controller once per epoch boundary.
///
/// Invariants: `best_val_ppl` only moves down once set, and `lr` only
/// moves down across epochs (it never recovers after an anneal).
#[derive(Debug, Clone)]
pub struct TrainingState {
    pub epoch: usize,
    pub lr: f32,
    pub best_val_ppl: Option<f64>,
    pub best_path: Option<PathBuf>,
}

impl TrainingState {
    pub fn new(lr: f32) -> Self {
        Self {
            epoch: 0,
            lr,
            best_val_ppl: None,
            best_path: None,
        }
    }

    /// Decides between keeping a new best checkpoint and annealing.
    ///
    /// Strict improvement (or the absence of any prior best) accepts the
    /// new perplexity; anything else divides the learning rate by
    /// `lr_decay` and leaves the best untouched.
    pub fn select(&mut self, val_ppl: f64, lr_decay: f32) -> Selection {
        match self.best_val_ppl {
            Some(best) if val_ppl >= best => {
                self.lr /= lr_decay;
                Selection::Annealed
            }
            _ => {
                self.best_val_ppl = Some(val_ppl);
                Selection::Improved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_epoch_always_improves() {
        let mut state = TrainingState::new(1.0);
        assert_eq!(state.select(500.0, 2.0), Selection::Improved);
        assert_eq!(state.best_val_ppl, Some(500.0));
        assert_eq!(state.lr, 1.0);
    }

    #[test]
    fn stagnation_halves_the_rate_and_keeps_the_best() {
        let mut state = TrainingState::new(1.0);
        state.select(200.0, 2.0);

        assert_eq!(state.select(200.0, 2.0), Selection::Annealed);
        assert_eq!(state.lr, 0.5);
        assert_eq!(state.select(250.0, 2.0), Selection::Annealed);
        assert_eq!(state.lr, 0.25);
        assert_eq!(state.best_val_ppl, Some(200.0));
    }

    #[test]
    fn improvement_keeps_the_rate() {
        let mut state = TrainingState::new(1.0);
        state.select(200.0, 2.0);
        state.select(300.0, 2.0); // anneal -> 0.5

        assert_eq!(state.select(150.0, 2.0), Selection::Improved);
        assert_eq!(state.lr, 0.5);
        assert_eq!(state.best_val_ppl, Some(150.0));
    }
}
