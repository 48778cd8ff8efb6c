//! Index-restricted SGD over the embedding table.
//!
//! The point of this path is what it does *not* do: no full-table scan
//! and no decay on rows the step never touched. Only the rows named by
//! the gradient buffer change; everything else stays bitwise identical.

use lm::{EmbeddingTable, GradientBuffer};

use crate::{Result, TrainErr};

/// Applies one decayed SGD step to the touched rows.
///
/// Duplicate indices in `buffer` are merged by summation first, so weight
/// decay is charged exactly once per touched row (merge-then-decay).
///
/// # Returns
/// The number of distinct rows updated.
///
/// # Errors
/// Propagates the precondition failures of [`apply_sparse_update`].
pub fn apply_step(
    table: &mut EmbeddingTable,
    buffer: &GradientBuffer,
    lr: f32,
    weight_decay: f32,
) -> Result<usize> {
    let merged = buffer.coalesce();
    apply_sparse_update(table, &merged.indices, &merged.values, lr, weight_decay)?;
    Ok(merged.indices.len())
}

/// Updates `table` rows listed in `indices` with the aligned flat rows in
/// `grads`: `row -= lr * (grad + weight_decay * row)`.
///
/// `indices` must already be duplicate-free; callers with raw per-entry
/// gradients go through [`apply_step`].
///
/// # Errors
/// Returns `TrainErr::GradientArityMismatch` when `grads` does not hold
/// exactly one row per index, and `TrainErr::Lm` for indices outside the
/// table.
pub fn apply_sparse_update(
    table: &mut EmbeddingTable,
    indices: &[usize],
    grads: &[f32],
    lr: f32,
    weight_decay: f32,
) -> Result<()> {
    let dim = table.dim();
    if indices.len() * dim != grads.len() {
        return Err(TrainErr::GradientArityMismatch {
            indices: indices.len(),
            values: grads.len(),
            dim,
        });
    }

    for (&index, grad) in indices.iter().zip(grads.chunks_exact(dim)) {
        table.check_row(index)?;

        let mut row = table.row_mut(index);
        for (w, &g) in row.iter_mut().zip(grad) {
            *w -= lr * (g + weight_decay * *w);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use lm::EmbeddingTable;
    use ndarray::Array2;

    use super::*;

    fn table(vocab: usize, dim: usize) -> EmbeddingTable {
        let weights =
            Array2::from_shape_fn((vocab, dim), |(i, j)| (i * dim + j) as f32 * 0.001 + 1.0);
        EmbeddingTable::from_array(weights)
    }

    #[test]
    fn merged_duplicates_match_the_worked_scenario() {
        // vocab 1000, dim 4, touched {3, 7, 3}: the duplicate gradients on
        // row 3 sum to [0.15; 4], decay adds 0.01 * row = [0.01; 4], and
        // the step leaves row 3 at [1,1,1,1] - 0.5 * [0.16; 4] = [0.92; 4].
        let mut table = EmbeddingTable::from_array(Array2::ones((1000, 4)));

        let mut buffer = GradientBuffer::new(4);
        buffer.push(3, &[0.1; 4]).unwrap();
        buffer.push(7, &[0.2; 4]).unwrap();
        buffer.push(3, &[0.05; 4]).unwrap();

        let updated = apply_step(&mut table, &buffer, 0.5, 0.01).unwrap();
        assert_eq!(updated, 2);

        for &w in table.row(3).iter() {
            assert!((w - 0.92).abs() < 1e-6);
        }
    }

    #[test]
    fn untouched_rows_are_bitwise_unchanged() {
        let mut t = table(50, 4);
        let before: Vec<u32> = t.as_slice().iter().map(|w| w.to_bits()).collect();

        let mut buffer = GradientBuffer::new(4);
        buffer.push(10, &[0.3; 4]).unwrap();
        buffer.push(20, &[0.7; 4]).unwrap();
        apply_step(&mut t, &buffer, 0.1, 0.01).unwrap();

        let after: Vec<u32> = t.as_slice().iter().map(|w| w.to_bits()).collect();
        for row in 0..50 {
            let range = row * 4..(row + 1) * 4;
            if row == 10 || row == 20 {
                assert_ne!(&before[range.clone()], &after[range]);
            } else {
                assert_eq!(&before[range.clone()], &after[range], "row {row} drifted");
            }
        }
    }

    #[test]
    fn duplicates_merge_before_decay_not_after() {
        let lr = 0.5;
        let wd = 0.01;

        let mut with_dups = table(10, 4);
        let mut buffer = GradientBuffer::new(4);
        buffer.push(5, &[0.1; 4]).unwrap();
        buffer.push(5, &[0.05; 4]).unwrap();
        apply_step(&mut with_dups, &buffer, lr, wd).unwrap();

        let mut presummed = table(10, 4);
        apply_sparse_update(&mut presummed, &[5], &[0.15; 4], lr, wd).unwrap();

        for (a, b) in with_dups.row(5).iter().zip(presummed.row(5).iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let mut t = table(10, 4);

        // Two indices but only one row of gradient values.
        let err = apply_sparse_update(&mut t, &[1, 2], &[0.0; 4], 0.1, 0.0).unwrap_err();
        assert!(matches!(
            err,
            TrainErr::GradientArityMismatch {
                indices: 2,
                values: 4,
                dim: 4
            }
        ));
    }

    #[test]
    fn out_of_bounds_rows_are_fatal() {
        let mut t = table(10, 4);
        let err = apply_sparse_update(&mut t, &[10], &[0.0; 4], 0.1, 0.0).unwrap_err();
        assert!(matches!(err, TrainErr::Lm(_)));
    }
}
