use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use rand::Rng;

use crate::{LmErr, Result};

const INIT_RANGE: f32 = 0.1;

/// The vocabulary-sized embedding table.
///
/// Mutated only through index-addressed row updates during training and
/// read densely during inference. Each worker process owns its table
/// outright; cross-process consistency comes from the collective calls on
/// the dense parameters, never from sharing this memory.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    weights: Array2<f32>,
}

impl EmbeddingTable {
    /// Creates a table with uniform random rows in `[-0.1, 0.1)`.
    pub fn new<R: Rng>(vocab_size: usize, dim: usize, rng: &mut R) -> Self {
        let weights = Array2::from_shape_simple_fn((vocab_size, dim), || {
            rng.random_range(-INIT_RANGE..INIT_RANGE)
        });
        Self { weights }
    }

    pub fn from_array(weights: Array2<f32>) -> Self {
        Self { weights }
    }

    pub fn vocab_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weights.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.weights.row(index)
    }

    pub fn row_mut(&mut self, index: usize) -> ArrayViewMut1<'_, f32> {
        self.weights.row_mut(index)
    }

    /// Checks that `index` addresses a valid row.
    pub fn check_row(&self, index: usize) -> Result<()> {
        if index < self.vocab_size() {
            Ok(())
        } else {
            Err(LmErr::RowOutOfBounds {
                index,
                vocab: self.vocab_size(),
            })
        }
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    /// Flat row-major view of the whole table.
    pub fn as_slice(&self) -> &[f32] {
        self.weights.as_slice().expect("owned table is contiguous")
    }

    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        self.weights
            .as_slice_mut()
            .expect("owned table is contiguous")
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn init_stays_inside_the_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let table = EmbeddingTable::new(50, 8, &mut rng);

        assert_eq!(table.vocab_size(), 50);
        assert_eq!(table.dim(), 8);
        assert!(table.as_slice().iter().all(|w| w.abs() < INIT_RANGE));
    }

    #[test]
    fn out_of_bounds_rows_are_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        let table = EmbeddingTable::new(10, 4, &mut rng);

        assert!(table.check_row(9).is_ok());
        assert!(matches!(
            table.check_row(10),
            Err(LmErr::RowOutOfBounds { index: 10, vocab: 10 })
        ));
    }
}
