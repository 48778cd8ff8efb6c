use rand::Rng;

use crate::{LmErr, Result};

/// Unigram noise distribution for NCE sampling.
///
/// Probabilities are proportional to raw token frequency counts. Sampling
/// uses a cumulative table with binary search, which is plenty for the
/// noise ratios the trainer runs with.
#[derive(Debug, Clone)]
pub struct NoiseDistribution {
    probs: Vec<f32>,
    cumulative: Vec<f32>,
}

impl NoiseDistribution {
    /// Builds the distribution from per-id frequency counts.
    ///
    /// # Errors
    /// Returns `LmErr::DegenerateNoise` when `counts` is empty or sums to
    /// zero, which would make sampling (and the NCE offset) undefined.
    pub fn from_counts(counts: &[u64]) -> Result<Self> {
        let total: u64 = counts.iter().sum();
        if counts.is_empty() || total == 0 {
            return Err(LmErr::DegenerateNoise);
        }

        let scale = 1.0 / total as f64;
        let mut probs = Vec::with_capacity(counts.len());
        let mut cumulative = Vec::with_capacity(counts.len());
        let mut acc = 0.0_f64;

        for &count in counts {
            let p = count as f64 * scale;
            acc += p;
            probs.push(p as f32);
            cumulative.push(acc as f32);
        }

        // Guard the tail against rounding so search can never fall off.
        if let Some(last) = cumulative.last_mut() {
            *last = 1.0;
        }

        Ok(Self { probs, cumulative })
    }

    pub fn vocab_size(&self) -> usize {
        self.probs.len()
    }

    /// Sampling probability of token `id`.
    pub fn prob(&self, id: usize) -> f32 {
        self.probs[id]
    }

    /// Draws one token id.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let point: f32 = rng.random();

        // First index whose cumulative mass exceeds the drawn point; ids
        // with zero count occupy no interval and are never selected.
        let i = self
            .cumulative
            .partition_point(|&c| c <= point);
        i.min(self.probs.len() - 1)
    }

    /// Fills `out` with `out.len()` independent draws.
    pub fn sample_into<R: Rng>(&self, rng: &mut R, out: &mut [usize]) {
        for slot in out {
            *slot = self.sample(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn probabilities_are_normalized() {
        let noise = NoiseDistribution::from_counts(&[1, 3, 4, 2]).unwrap();

        let total: f32 = (0..4).map(|id| noise.prob(id)).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!((noise.prob(2) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn zero_mass_counts_are_rejected() {
        assert!(matches!(
            NoiseDistribution::from_counts(&[]),
            Err(LmErr::DegenerateNoise)
        ));
        assert!(matches!(
            NoiseDistribution::from_counts(&[0, 0, 0]),
            Err(LmErr::DegenerateNoise)
        ));
    }

    #[test]
    fn samples_stay_in_range_and_skip_zero_counts() {
        let noise = NoiseDistribution::from_counts(&[0, 5, 0, 5]).unwrap();
        let mut rng = StdRng::seed_from_u64(99);

        let mut draws = [0_usize; 256];
        noise.sample_into(&mut rng, &mut draws);

        for &id in &draws {
            assert!(id == 1 || id == 3, "sampled zero-count id {id}");
        }
    }
}
