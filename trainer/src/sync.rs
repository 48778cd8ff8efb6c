//! Dense-parameter averaging across the worker group.

use collective::ProcessGroup;
use lm::NceModel;
use log::debug;

use crate::Result;

/// Averages every dense tensor in place across the group.
///
/// Tensors are reduced one per round, in the model's fixed parameter
/// order, so every worker must enter this call with the same model
/// architecture. The embedding table is deliberately excluded: its updates
/// are sparse and per-worker, and shipping the full table every cadence
/// would dwarf the dense traffic.
///
/// # Errors
/// Returns `TrainErr::Collective` on transport failure or a desynchronized
/// group.
pub async fn sync_dense<M: NceModel>(group: &mut ProcessGroup, model: &mut M) -> Result<()> {
    let mut elements = 0usize;
    for tensor in model.dense_params_mut() {
        group.all_reduce_mean(tensor).await?;
        elements += tensor.len();
    }

    debug!(rank = group.rank(), elements = elements; "dense parameters averaged");
    Ok(())
}
