use std::collections::BTreeMap;

use crate::{LmErr, Result};

/// Accumulated gradients for the embedding rows touched in one optimizer
/// step.
///
/// Entries are appended as the backward pass visits rows; the same row may
/// appear several times (a token seen as both input and sampled noise).
/// [`GradientBuffer::coalesce`] merges duplicates by summing before the
/// update applies weight decay, so decay is charged once per touched row.
///
/// Lifecycle: filled during one step, drained by the sparse update, then
/// reused (cleared) for the next step.
#[derive(Debug, Clone)]
pub struct GradientBuffer {
    dim: usize,
    indices: Vec<usize>,
    // Flat rows, aligned with `indices`.
    values: Vec<f32>,
}

/// Duplicate-free touched rows with their summed gradients, ready for the
/// sparse update.
#[derive(Debug)]
pub struct CoalescedGrads {
    pub dim: usize,
    pub indices: Vec<usize>,
    /// Flat rows, aligned with `indices`.
    pub values: Vec<f32>,
}

impl GradientBuffer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of accumulated entries, duplicates included.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
        self.values.clear();
    }

    /// Appends one row gradient.
    ///
    /// # Errors
    /// Returns `LmErr::ShapeMismatch` when `grad` is not `dim` wide.
    pub fn push(&mut self, index: usize, grad: &[f32]) -> Result<()> {
        if grad.len() != self.dim {
            return Err(LmErr::ShapeMismatch {
                what: "sparse gradient row",
                got: grad.len(),
                expected: self.dim,
            });
        }

        self.indices.push(index);
        self.values.extend_from_slice(grad);
        Ok(())
    }

    /// Adds `grad` scaled by `scale` to the entry for `index`, appending a
    /// new entry when the row was not yet touched by this accumulator run.
    ///
    /// Appending unconditionally would also be correct (coalescing merges
    /// later); scanning recent entries keeps the buffer small for the
    /// common case of a token repeating within one batch.
    pub fn accumulate(&mut self, index: usize, grad: &[f32], scale: f32) -> Result<()> {
        if grad.len() != self.dim {
            return Err(LmErr::ShapeMismatch {
                what: "sparse gradient row",
                got: grad.len(),
                expected: self.dim,
            });
        }

        if let Some(pos) = self.indices.iter().rposition(|&i| i == index) {
            let row = &mut self.values[pos * self.dim..(pos + 1) * self.dim];
            for (acc, g) in row.iter_mut().zip(grad) {
                *acc += scale * g;
            }
            return Ok(());
        }

        self.indices.push(index);
        self.values.extend(grad.iter().map(|g| scale * g));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f32])> {
        self.indices
            .iter()
            .copied()
            .zip(self.values.chunks_exact(self.dim))
    }

    /// Merges duplicate indices by summation, yielding rows in ascending
    /// index order for determinism.
    pub fn coalesce(&self) -> CoalescedGrads {
        let mut merged: BTreeMap<usize, Vec<f32>> = BTreeMap::new();

        for (index, row) in self.iter() {
            match merged.get_mut(&index) {
                Some(acc) => {
                    for (a, g) in acc.iter_mut().zip(row) {
                        *a += g;
                    }
                }
                None => {
                    merged.insert(index, row.to_vec());
                }
            }
        }

        let mut indices = Vec::with_capacity(merged.len());
        let mut values = Vec::with_capacity(merged.len() * self.dim);
        for (index, row) in merged {
            indices.push(index);
            values.extend_from_slice(&row);
        }

        CoalescedGrads {
            dim: self.dim,
            indices,
            values,
        }
    }
}

impl CoalescedGrads {
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f32])> {
        self.indices
            .iter()
            .copied()
            .zip(self.values.chunks_exact(self.dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesce_sums_duplicate_rows() {
        let mut buf = GradientBuffer::new(2);
        buf.push(3, &[0.1, 0.2]).unwrap();
        buf.push(7, &[1.0, 1.0]).unwrap();
        buf.push(3, &[0.4, 0.3]).unwrap();

        let merged = buf.coalesce();
        assert_eq!(merged.indices, vec![3, 7]);
        assert_eq!(merged.values, vec![0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn accumulate_folds_into_existing_entries() {
        let mut buf = GradientBuffer::new(2);
        buf.accumulate(5, &[1.0, 2.0], 1.0).unwrap();
        buf.accumulate(5, &[1.0, 2.0], 0.5).unwrap();

        assert_eq!(buf.len(), 1);
        let merged = buf.coalesce();
        assert_eq!(merged.values, vec![1.5, 3.0]);
    }

    #[test]
    fn wrong_width_rows_are_rejected() {
        let mut buf = GradientBuffer::new(4);
        let err = buf.push(0, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, LmErr::ShapeMismatch { got: 2, expected: 4, .. }));
    }
}
