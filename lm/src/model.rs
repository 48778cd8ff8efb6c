use crate::{Batch, EmbeddingTable, GradientBuffer, Mode, Result};

/// The trainer's view of a noise-contrastively trained language model.
///
/// The orchestrator never looks inside the network; it drives this
/// interface: run a batch in an explicit [`Mode`], then collect the dense
/// gradients and the touched-row embedding gradients that a `Train` pass
/// left behind.
///
/// Implementations expose parameters in two groups. The small *dense*
/// tensors (recurrent weights, NCE bias) are enumerated whole, in a fixed
/// order that every worker agrees on, because the collective reduction
/// walks them positionally. The embedding table is the *sparse* group and
/// is only ever updated through [`GradientBuffer`] rows.
pub trait NceModel {
    /// Runs one batch and returns the mean loss per predicted token.
    ///
    /// In `Mode::Train` this is a combined forward/backward pass: dense
    /// gradient buffers and the sparse embedding gradient accumulate as a
    /// side effect. In `Mode::Eval` the model scores the full vocabulary
    /// exactly (no noise approximation, no dropout) and leaves every
    /// gradient buffer untouched.
    fn forward(&mut self, batch: &Batch, mode: Mode) -> Result<f32>;

    /// Clears the dense gradient buffers and the sparse gradient buffer.
    fn zero_grads(&mut self);

    /// Dense parameters as flat views, in the fixed synchronization order.
    fn dense_params_mut(&mut self) -> Vec<&mut [f32]>;

    /// Dense gradients, aligned with [`NceModel::dense_params_mut`].
    fn dense_grads_mut(&mut self) -> Vec<&mut [f32]>;

    /// `(parameter, gradient)` pairs, aligned with the fixed order.
    fn dense_pairs(&mut self) -> Vec<(&mut [f32], &[f32])>;

    /// Takes ownership of the embedding gradients accumulated by the last
    /// `Train` pass, leaving an empty buffer in place.
    fn take_sparse_grad(&mut self) -> GradientBuffer;

    fn embedding(&self) -> &EmbeddingTable;

    fn embedding_mut(&mut self) -> &mut EmbeddingTable;

    /// Named tensors for checkpointing: `(name, shape, row-major data)`.
    fn tensors(&self) -> Vec<(&'static str, Vec<usize>, &[f32])>;

    /// Restores one named tensor from a checkpoint.
    ///
    /// # Errors
    /// Returns `LmErr::UnknownTensor` for an unrecognized name and
    /// `LmErr::ShapeMismatch` when the stored shape disagrees.
    fn load_tensor(&mut self, name: &str, shape: &[usize], data: &[f32]) -> Result<()>;
}
