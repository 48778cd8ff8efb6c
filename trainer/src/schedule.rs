use std::num::NonZeroUsize;

/// Defines when to run the dense-parameter synchronization.
///
/// Every worker derives the same answer from its local batch index, which
/// is what keeps the group's collective calls aligned.
#[derive(Debug, Clone)]
pub struct SyncSchedule {
    pub log_interval: NonZeroUsize,
}

impl SyncSchedule {
    pub fn new(log_interval: NonZeroUsize) -> Self {
        Self { log_interval }
    }

    /// Returns true when this batch index falls on the cadence. Batch 0
    /// never syncs: there is no interval behind it to report.
    #[inline]
    pub fn should_sync(&self, batch_index: usize) -> bool {
        batch_index > 0 && batch_index % self.log_interval.get() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_skips_batch_zero() {
        let s = SyncSchedule::new(NonZeroUsize::new(3).unwrap());
        assert!(!s.should_sync(0));
        assert!(!s.should_sync(1));
        assert!(!s.should_sync(2));
        assert!(s.should_sync(3));
        assert!(!s.should_sync(4));
        assert!(s.should_sync(6));
    }

    #[test]
    fn interval_of_one_syncs_every_later_batch() {
        let s = SyncSchedule::new(NonZeroUsize::new(1).unwrap());
        assert!(!s.should_sync(0));
        assert!(s.should_sync(1));
        assert!(s.should_sync(2));
    }
}
