use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::notification::RemovalCause;

/// A snapshot of a store's statistics counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    hit_count: u64,
    miss_count: u64,
    compute_success_count: u64,
    compute_failure_count: u64,
    eviction_count: u64,
    eviction_weight: u64,
    expiration_count: u64,
}

impl StoreStats {
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Returns the ratio of requests that were hits, or `1.0` when there was
    /// no request.
    pub fn hit_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            1.0
        } else {
            self.hit_count as f64 / req_count as f64
        }
    }

    /// Returns how many mapping functions produced a value or nothing.
    pub fn compute_success_count(&self) -> u64 {
        self.compute_success_count
    }

    /// Returns how many mapping functions returned an error or panicked.
    pub fn compute_failure_count(&self) -> u64 {
        self.compute_failure_count
    }

    /// Returns how many entries were evicted to enforce the capacity.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    /// Returns the sum of the weights of the evicted entries.
    pub fn eviction_weight(&self) -> u64 {
        self.eviction_weight
    }

    /// Returns how many entries were removed because they expired.
    pub fn expiration_count(&self) -> u64 {
        self.expiration_count
    }
}

#[derive(Default)]
pub(crate) struct StatsCounter {
    hit_count: CachePadded<AtomicU64>,
    miss_count: CachePadded<AtomicU64>,
    compute_success_count: AtomicU64,
    compute_failure_count: AtomicU64,
    eviction_count: AtomicU64,
    eviction_weight: AtomicU64,
    expiration_count: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compute(&self, succeeded: bool) {
        if succeeded {
            self.compute_success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.compute_failure_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_removal(&self, weight: u64, cause: RemovalCause) {
        match cause {
            RemovalCause::Size => {
                self.eviction_count.fetch_add(1, Ordering::Relaxed);
                self.eviction_weight.fetch_add(weight, Ordering::Relaxed);
            }
            RemovalCause::Expired => {
                self.expiration_count.fetch_add(1, Ordering::Relaxed);
            }
            RemovalCause::Explicit | RemovalCause::Replaced => (),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            compute_success_count: self.compute_success_count.load(Ordering::Relaxed),
            compute_failure_count: self.compute_failure_count.load(Ordering::Relaxed),
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
            expiration_count: self.expiration_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StatsCounter;
    use crate::notification::RemovalCause;

    #[test]
    fn counts_by_cause() {
        let counter = StatsCounter::default();
        assert_eq!(counter.snapshot().hit_rate(), 1.0);

        counter.record_hit();
        counter.record_miss();
        counter.record_miss();
        counter.record_compute(true);
        counter.record_compute(false);
        counter.record_removal(3, RemovalCause::Size);
        counter.record_removal(1, RemovalCause::Expired);
        counter.record_removal(1, RemovalCause::Explicit);

        let stats = counter.snapshot();
        assert_eq!(stats.request_count(), 3);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.compute_success_count(), 1);
        assert_eq!(stats.compute_failure_count(), 1);
        assert_eq!(stats.eviction_count(), 1);
        assert_eq!(stats.eviction_weight(), 3);
        assert_eq!(stats.expiration_count(), 1);
    }
}
