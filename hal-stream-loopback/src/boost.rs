use std::sync::atomic::{AtomicUsize, Ordering};

use hal_stream_core::traits::perf_boost::PerformanceBoost;

/// Reference-counted stand-in for a CPU performance lock.
///
/// The boost is "held" while the count is non-zero. Releases without a
/// matching acquire are ignored.
#[derive(Debug, Default)]
pub struct RefCountedBoost {
    holders: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl RefCountedBoost {
    pub fn is_held(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    /// Total acquisitions since creation.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl PerformanceBoost for RefCountedBoost {
    fn acquire(&self) {
        if self.holders.fetch_add(1, Ordering::SeqCst) == 0 {
            log::trace!("performance boost engaged");
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let released = self
            .holders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released == Ok(1) {
            log::trace!("performance boost released");
        }
    }
}
