use std::{sync::Arc, time::Duration};

pub(crate) mod atomic_time;
pub(crate) mod clock;
mod instant;

pub(crate) use atomic_time::AtomicInstant;
pub use clock::{ManualTimeSource, SystemTimeSource};
pub use instant::Instant;

/// A monotonic source of time used by a store to stamp and expire its entries.
///
/// Every [`Instant`][instant] handed out by a time source is measured from the
/// source's own origin, so instants from two different sources must never be
/// compared.
///
/// [instant]: ./struct.Instant.html
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Instant;

    /// Returns the current time _maybe_ using a faster but less precise
    /// source. Only used for bookkeeping that never decides expiration, such
    /// as the last access time of an entry.
    fn fast_now(&self) -> Instant {
        self.now()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn fast_now(&self) -> Instant {
        (**self).fast_now()
    }
}

pub(crate) type SharedTimeSource = Arc<dyn TimeSource + 'static>;

/// Returns the time at which something that happened at `at` becomes stale
/// after `duration`, or `None` if the duration is `None`.
pub(crate) fn deadline_after(at: Instant, duration: Option<Duration>) -> Option<Instant> {
    duration.map(|d| at.saturating_add(d))
}
