use std::time::{Duration, Instant as StdInstant};

use parking_lot::RwLock;

use super::{Instant, TimeSource};

/// The default [`TimeSource`][time-source], reading the operating system's
/// monotonic clock.
///
/// [time-source]: ./trait.TimeSource.html
#[derive(Clone)]
pub struct SystemTimeSource {
    ty: ClockType,
}

#[derive(Clone)]
enum ClockType {
    /// A clock that uses `std::time::Instant` as the source of time.
    #[cfg_attr(feature = "quanta", allow(dead_code))]
    Standard { origin: StdInstant },
    #[cfg(feature = "quanta")]
    /// A clock that uses both `std::time::Instant` and `quanta::Instant` as the
    /// sources of time.
    Hybrid {
        std_origin: StdInstant,
        quanta_origin: quanta::Instant,
    },
}

impl Default for ClockType {
    /// Create a new `ClockType` with the current time as the origin.
    ///
    /// If the `quanta` feature is enabled, `Hybrid` will be used. Otherwise,
    /// `Standard` will be used.
    fn default() -> Self {
        #[cfg(feature = "quanta")]
        {
            return ClockType::Hybrid {
                std_origin: StdInstant::now(),
                quanta_origin: quanta::Instant::now(),
            };
        }

        #[allow(unreachable_code)]
        ClockType::Standard {
            origin: StdInstant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            ty: ClockType::default(),
        }
    }
}

impl SystemTimeSource {
    /// Creates a time source whose origin is the current time.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        match &self.ty {
            ClockType::Standard { origin } => {
                Instant::from_duration_since_origin(origin.elapsed())
            }
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { std_origin, .. } => {
                Instant::from_duration_since_origin(std_origin.elapsed())
            }
        }
    }

    /// When the `quanta` feature is enabled, the time is based on
    /// `quanta::Instant`, which can be faster than `std::time::Instant`,
    /// depending on the CPU architecture. The time may drift from the time
    /// returned by `now`, or not be monotonically increasing.
    fn fast_now(&self) -> Instant {
        match &self.ty {
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { quanta_origin, .. } => Instant::from_duration_since_origin(
                quanta::Instant::now().saturating_duration_since(*quanta_origin),
            ),
            ClockType::Standard { .. } => self.now(),
        }
    }
}

/// A [`TimeSource`][time-source] that only moves when told to. Use it to
/// drive expiration deterministically in tests.
///
/// # Examples
///
/// ```rust
/// use heapcache::time::{ManualTimeSource, TimeSource};
/// use std::time::Duration;
///
/// let clock = ManualTimeSource::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.now().saturating_duration_since(t0), Duration::from_secs(2));
/// ```
///
/// [time-source]: ./trait.TimeSource.html
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    elapsed: RwLock<Duration>,
}

impl ManualTimeSource {
    /// Creates a time source standing at its origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the time forward by `amount`.
    pub fn advance(&self, amount: Duration) {
        *self.elapsed.write() += amount;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        Instant::from_duration_since_origin(*self.elapsed.read())
    }
}
