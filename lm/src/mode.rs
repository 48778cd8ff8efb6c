/// Explicit run mode, threaded through forward calls instead of living as
/// mutable state on the model.
///
/// `Train` enables the noise-contrastive objective and dropout; `Eval`
/// scores against the full vocabulary exactly and disables stochastic
/// regularization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}
