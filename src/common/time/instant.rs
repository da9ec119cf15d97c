use std::time::Duration;

pub(crate) const MAX_NANOS: u64 = u64::MAX - 1;

/// `Instant` represents a point in time since a [`TimeSource`][time-source] was
/// created. It has nanosecond precision.
///
/// [time-source]: ./trait.TimeSource.html
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    elapsed_ns: u64,
}

impl Instant {
    /// The origin of every time source.
    pub const ZERO: Instant = Instant { elapsed_ns: 0 };

    pub(crate) fn from_nanos(nanos: u64) -> Instant {
        debug_assert!(nanos <= MAX_NANOS);
        Instant { elapsed_ns: nanos }
    }

    /// Creates an `Instant` that is `duration` past the time source's origin.
    pub fn from_duration_since_origin(duration: Duration) -> Instant {
        Instant::from_nanos(Self::duration_to_saturating_nanoseconds(duration))
    }

    /// Returns the number of nanoseconds since the time source's origin.
    pub fn as_nanos(&self) -> u64 {
        self.elapsed_ns
    }

    /// Returns the number of whole milliseconds since the time source's origin.
    pub fn as_millis(&self) -> u64 {
        self.elapsed_ns / 1_000_000
    }

    /// Converts a `std::time::Duration` to nanoseconds, saturating to
    /// `MAX_NANOSECONDS` (`u64::MAX - 1`) if the duration is too large.
    /// (`Duration::as_nanos` returns `u128`)
    ///
    /// Note that `u64::MAX - 1` is used here instead of `u64::MAX` because
    /// `u64::MAX` is used by `AtomicInstant` to indicate the time is unset.
    pub(crate) fn duration_to_saturating_nanoseconds(duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos())
            .map(|n| n.min(MAX_NANOS))
            .unwrap_or(MAX_NANOS)
    }

    /// Returns `self + duration`, saturating at the largest representable
    /// instant.
    pub fn saturating_add(&self, duration: Duration) -> Instant {
        let dur_ns = Self::duration_to_saturating_nanoseconds(duration);
        Instant::from_nanos(self.elapsed_ns.saturating_add(dur_ns).min(MAX_NANOS))
    }

    /// Returns the duration elapsed from `earlier` to `self`, or zero if
    /// `earlier` is later than `self`.
    pub fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.saturating_sub(earlier.elapsed_ns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_add() {
        let instant = Instant::from_nanos(100_000);
        let duration = Duration::from_nanos(50_000);
        let result = instant.saturating_add(duration);
        assert_eq!(result, Instant::from_nanos(150_000));

        let instant = Instant::from_nanos(u64::MAX - 10_000);
        let duration = Duration::from_nanos(12_000);
        let result = instant.saturating_add(duration);
        assert_eq!(result, Instant::from_nanos(u64::MAX - 1));
    }

    #[test]
    fn test_saturating_duration_since() {
        let instant = Instant::from_nanos(100_000);
        let earlier = Instant::from_nanos(60_000);
        let result = instant.saturating_duration_since(earlier);
        assert_eq!(result, Duration::from_nanos(40_000));

        let instant = Instant::from_nanos(60_000);
        let earlier = Instant::from_nanos(100_000);
        let result = instant.saturating_duration_since(earlier);
        assert_eq!(result, Duration::ZERO);
    }

    #[test]
    fn test_as_millis() {
        let instant = Instant::from_duration_since_origin(Duration::from_millis(1_500));
        assert_eq!(instant.as_millis(), 1_500);
        assert_eq!(Instant::ZERO.as_millis(), 0);
    }
}
