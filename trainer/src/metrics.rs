/// Per-run training counters plus the interval loss accumulator behind
/// the cadence logging.
#[derive(Debug, Default, Clone)]
pub struct TrainMetrics {
    pub batches: u64,
    pub tokens: u64,
    pub syncs: u64,

    interval_loss: f64,
    interval_batches: u64,
}

impl TrainMetrics {
    #[inline]
    pub fn add_batch(&mut self, loss: f32, tokens: usize) {
        self.batches += 1;
        self.tokens += tokens as u64;
        self.interval_loss += f64::from(loss);
        self.interval_batches += 1;
    }

    #[inline]
    pub fn bump_sync(&mut self) {
        self.syncs += 1;
    }

    /// Perplexity averaged over the batches since the last reset. The
    /// reported value therefore covers the interval, not the last batch.
    pub fn interval_ppl(&self) -> f64 {
        if self.interval_batches == 0 {
            return f64::NAN;
        }
        (self.interval_loss / self.interval_batches as f64).exp()
    }

    #[inline]
    pub fn reset_interval(&mut self) {
        self.interval_loss = 0.0;
        self.interval_batches = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_ppl_averages_since_last_reset() {
        let mut m = TrainMetrics::default();
        m.add_batch(1.0, 10);
        m.add_batch(3.0, 10);

        assert!((m.interval_ppl() - 2.0_f64.exp()).abs() < 1e-9);

        m.reset_interval();
        m.add_batch(0.0, 5);
        assert!((m.interval_ppl() - 1.0).abs() < 1e-9);
        assert_eq!(m.batches, 3);
        assert_eq!(m.tokens, 25);
    }
}
