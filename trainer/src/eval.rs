//! Exact-softmax evaluation over a held-out stream.

use lm::{Batch, Mode, NceModel};

use crate::{Result, TrainErr};

/// Scores `batches` with the full softmax and returns the perplexity.
///
/// Each batch's mean loss is weighted by its predicted-token count, so the
/// result is the per-token perplexity of the whole stream regardless of how
/// it was chunked. Runs in `Mode::Eval`: no dropout, no noise samples, no
/// gradient accumulation.
///
/// # Errors
/// Returns `TrainErr::EmptyEvalStream` when `batches` holds no predicted
/// tokens, and propagates model failures.
pub fn evaluate<M: NceModel>(model: &mut M, batches: &[Batch]) -> Result<f64> {
    let mut total_loss = 0.0f64;
    let mut total_tokens = 0usize;

    for batch in batches {
        let loss = model.forward(batch, Mode::Eval)?;
        total_loss += f64::from(loss) * batch.token_count as f64;
        total_tokens += batch.token_count;
    }

    if total_tokens == 0 {
        return Err(TrainErr::EmptyEvalStream);
    }

    Ok((total_loss / total_tokens as f64).exp())
}
