use super::Instant;

use std::sync::atomic::{AtomicU64, Ordering};

/// `AtomicInstant` is a wrapper around `AtomicU64` that provides thread-safe access
/// to an `Instant`.
///
/// `u64::MAX` is used to represent an unset `Instant`.
#[derive(Debug)]
pub(crate) struct AtomicInstant {
    instant: AtomicU64,
}

impl Default for AtomicInstant {
    /// Creates a new `AtomicInstant` with an unset `Instant`.
    fn default() -> Self {
        Self {
            instant: AtomicU64::new(u64::MAX),
        }
    }
}

impl AtomicInstant {
    /// Creates a new `AtomicInstant` holding the given `Instant`, or an unset one.
    pub(crate) fn new(instant: Option<Instant>) -> Self {
        let ai = Self::default();
        ai.set(instant);
        ai
    }

    /// Returns the `Instant` if it is set, otherwise `None`.
    pub(crate) fn instant(&self) -> Option<Instant> {
        let ts = self.instant.load(Ordering::Acquire);
        if ts == u64::MAX {
            None
        } else {
            Some(Instant::from_nanos(ts))
        }
    }

    /// Sets or clears the `Instant`.
    pub(crate) fn set(&self, instant: Option<Instant>) {
        match instant {
            Some(instant) => {
                // Ensure the `Instant` is not `u64::MAX`, which means unset.
                debug_assert!(instant.as_nanos() != u64::MAX);
                self.instant.store(instant.as_nanos(), Ordering::Release);
            }
            None => self.instant.store(u64::MAX, Ordering::Release),
        }
    }

    /// Moves the `Instant` forward to `instant`. Never moves it backward, so
    /// two racing readers cannot undo each other's updates.
    pub(crate) fn advance_to(&self, instant: Instant) {
        debug_assert!(instant.as_nanos() != u64::MAX);
        let new = instant.as_nanos();
        let mut current = self.instant.load(Ordering::Acquire);
        while current == u64::MAX || current < new {
            match self.instant.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}
