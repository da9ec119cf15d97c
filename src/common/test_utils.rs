use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::notification::RemovalCause;

/// Counts the removal notifications of a store by cause.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    evicted: AtomicU32,
    expired: AtomicU32,
    replaced: AtomicU32,
    removed: AtomicU32,
}

impl Counters {
    pub(crate) fn evicted(&self) -> u32 {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) fn expired(&self) -> u32 {
        self.expired.load(Ordering::Acquire)
    }

    pub(crate) fn replaced(&self) -> u32 {
        self.replaced.load(Ordering::Acquire)
    }

    pub(crate) fn removed(&self) -> u32 {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn incl(&self, cause: RemovalCause) {
        let counter = match cause {
            RemovalCause::Size => &self.evicted,
            RemovalCause::Expired => &self.expired,
            RemovalCause::Replaced => &self.replaced,
            RemovalCause::Explicit => &self.removed,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns a listener feeding these counters.
    pub(crate) fn listener<K: 'static, V: 'static>(
        self: &Arc<Self>,
    ) -> impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static {
        let counters = Arc::clone(self);
        move |_k, _v, cause| counters.incl(cause)
    }
}

/// A counting semaphore, used to hold tasks and computations at a known
/// point.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.released.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Returns `false` if no permit became available within `timeout`.
    pub(crate) fn try_acquire_for(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        let timed_out = self
            .released
            .wait_while_for(&mut permits, |p| *p == 0, timeout)
            .timed_out();
        if timed_out && *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub(crate) fn release(&self, permits: usize) {
        *self.permits.lock() += permits;
        self.released.notify_all();
    }
}
