use std::{cmp::Ordering, fmt, time::Duration};

use crate::{
    common::concurrent::constants::{DEFAULT_EVICTION_SAMPLE_SIZE, DEFAULT_MAX_EVICTION_ATTEMPTS},
    time::Instant,
    BuildError,
};

#[derive(Clone, Debug)]
/// The policy of a store, as it was configured at construction time.
pub struct StorePolicy {
    max_capacity: Option<u64>,
    num_segments: usize,
    eviction: EvictionConfig,
    has_veto: bool,
    has_prioritizer: bool,
}

impl StorePolicy {
    pub(crate) fn new(
        max_capacity: Option<u64>,
        num_segments: usize,
        eviction: EvictionConfig,
        has_veto: bool,
        has_prioritizer: bool,
    ) -> Self {
        Self {
            max_capacity,
            num_segments,
            eviction,
            has_veto,
            has_prioritizer,
        }
    }

    /// Returns the `max_capacity` of the store, or `None` if it is unbounded.
    pub fn max_capacity(&self) -> Option<u64> {
        self.max_capacity
    }

    /// Returns the number of internal segments of the entry map.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Returns the eviction tunables.
    pub fn eviction(&self) -> &EvictionConfig {
        &self.eviction
    }

    /// Returns `true` if an eviction veto was configured.
    pub fn has_eviction_veto(&self) -> bool {
        self.has_veto
    }

    /// Returns `true` if an eviction prioritizer was configured.
    pub fn has_eviction_prioritizer(&self) -> bool {
        self.has_prioritizer
    }
}

/// Tunables of the sampling eviction algorithm.
///
/// Each eviction round draws `sample_size` random live entries and evicts the
/// lowest ranked one that is not vetoed. When `max_attempts` consecutive
/// rounds find nothing to evict (every sampled entry was vetoed, or the
/// chosen victim was concurrently replaced), capacity enforcement stops and
/// the store may stay above its capacity until the next write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionConfig {
    sample_size: usize,
    max_attempts: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_EVICTION_SAMPLE_SIZE,
            max_attempts: DEFAULT_MAX_EVICTION_ATTEMPTS,
        }
    }
}

impl EvictionConfig {
    /// Creates an eviction configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is zero.
    pub fn new(sample_size: usize, max_attempts: usize) -> Result<Self, BuildError> {
        if sample_size == 0 {
            return Err(BuildError::ZeroSampleSize);
        }
        if max_attempts == 0 {
            return Err(BuildError::ZeroEvictionAttempts);
        }
        Ok(Self {
            sample_size,
            max_attempts,
        })
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

/// Exempts live entries from eviction.
///
/// A veto is only ever consulted with fully computed values. It is called
/// without any lock of the store held, so it may be slow, but a slow veto
/// slows down the writer that triggered the eviction.
///
/// Closures of type `Fn(&K, &V) -> bool` implement this trait.
pub trait EvictionVeto<K, V>: Send + Sync {
    /// Returns `true` if the entry must not be evicted.
    fn vetoes(&self, key: &K, value: &V) -> bool;
}

impl<K, V, F> EvictionVeto<K, V> for F
where
    F: Fn(&K, &V) -> bool + Send + Sync,
{
    fn vetoes(&self, key: &K, value: &V) -> bool {
        self(key, value)
    }
}

/// Ranks live entries for eviction. Out of every sample, the entry ranked
/// lowest (the minimum under `compare`) is evicted. Ties are broken
/// arbitrarily.
///
/// Like [`EvictionVeto`], it is only ever consulted with fully computed values.
///
/// Closures of type `Fn(&K, &V, &K, &V) -> Ordering` implement this trait.
pub trait EvictionPrioritizer<K, V>: Send + Sync {
    fn compare(&self, key1: &K, value1: &V, key2: &K, value2: &V) -> Ordering;
}

impl<K, V, F> EvictionPrioritizer<K, V> for F
where
    F: Fn(&K, &V, &K, &V) -> Ordering + Send + Sync,
{
    fn compare(&self, key1: &K, value1: &V, key2: &K, value2: &V) -> Ordering {
        self(key1, value1, key2, value2)
    }
}

/// Calculates when entries expire. A single expiration deadline is retained on
/// each entry so that the lifetime of an entry may be extended or reduced by
/// subsequent evaluations.
///
/// `Expiry` trait provides three methods. They specify the expiration time of an
/// entry by returning a `Some(duration)` until the entry expires:
///
/// - [`expire_after_create`](#method.expire_after_create) &mdash; Returns the
///   duration (or none) after the entry's creation.
/// - [`expire_after_read`](#method.expire_after_read) &mdash; Returns the duration
///   (or none) after its last read.
/// - [`expire_after_update`](#method.expire_after_update) &mdash; Returns the
///   duration (or none) after its last update.
///
/// The default implementations are provided that return `None` (no expiration) or
/// `duration_until_expiry` (not modify the current expiration time).
///
/// Expiration is checked lazily. An expired entry is removed by the first
/// operation that touches it; nothing sweeps the store in the background.
pub trait Expiry<K, V>: Send + Sync {
    /// Specifies that the entry should be removed once the duration has elapsed
    /// after the entry's creation. This method is called for store write
    /// methods such as `put` and `compute_if_absent` but only when the key was
    /// not present in the store.
    #[allow(unused_variables)]
    fn expire_after_create(&self, key: &K, value: &V, created_at: Instant) -> Option<Duration> {
        None
    }

    /// Specifies that the entry should be removed once the duration has elapsed
    /// after its last read. This method is called for store read methods such
    /// as `get` but only when the key is present and not yet expired.
    ///
    /// - `duration_until_expiry` &mdash; The remaining duration until the entry
    ///   expires, or `None` if it does not expire.
    /// - `last_modified_at` &mdash; The time when this entry was created or
    ///   last updated.
    #[allow(unused_variables)]
    fn expire_after_read(
        &self,
        key: &K,
        value: &V,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        duration_until_expiry
    }

    /// Specifies that the entry should be removed once the duration has elapsed
    /// after the replacement of its value. This method is called for store
    /// write methods such as `put` and `compute` but only when the key is
    /// already present in the store.
    #[allow(unused_variables)]
    fn expire_after_update(
        &self,
        key: &K,
        value: &V,
        updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        duration_until_expiry
    }
}

/// An [`Expiry`] made of a time-to-live and/or a time-to-idle.
///
/// - A time-to-live expires an entry a fixed duration after it was created or
///   updated.
/// - A time-to-idle expires an entry a fixed duration after it was last read,
///   created or updated.
///
/// When both are set, an entry expires at the earliest of the two deadlines.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
    time_to_live: Option<Duration>,
    time_to_idle: Option<Duration>,
}

impl fmt::Debug for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiryPolicy")
            .field("time_to_live", &self.time_to_live)
            .field("time_to_idle", &self.time_to_idle)
            .finish()
    }
}

impl ExpiryPolicy {
    pub fn new(time_to_live: Option<Duration>, time_to_idle: Option<Duration>) -> Self {
        Self {
            time_to_live,
            time_to_idle,
        }
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live
    }

    pub fn time_to_idle(&self) -> Option<Duration> {
        self.time_to_idle
    }

    fn on_write(&self) -> Option<Duration> {
        match (self.time_to_live, self.time_to_idle) {
            (Some(ttl), Some(tti)) => Some(ttl.min(tti)),
            (ttl, tti) => ttl.or(tti),
        }
    }
}

impl<K, V> Expiry<K, V> for ExpiryPolicy {
    fn expire_after_create(&self, _key: &K, _value: &V, _created_at: Instant) -> Option<Duration> {
        self.on_write()
    }

    fn expire_after_read(
        &self,
        _key: &K,
        _value: &V,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        last_modified_at: Instant,
    ) -> Option<Duration> {
        let Some(tti) = self.time_to_idle else {
            return duration_until_expiry;
        };
        match self.time_to_live {
            Some(ttl) => {
                let lived = read_at.saturating_duration_since(last_modified_at);
                Some(tti.min(ttl.saturating_sub(lived)))
            }
            None => Some(tti),
        }
    }

    fn expire_after_update(
        &self,
        _key: &K,
        _value: &V,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.on_write()
    }
}

#[cfg(test)]
mod tests {
    use super::{EvictionConfig, EvictionPrioritizer, EvictionVeto, Expiry, ExpiryPolicy};
    use crate::{time::Instant, BuildError};
    use std::{cmp::Ordering, time::Duration};

    fn at(secs: u64) -> Instant {
        Instant::from_duration_since_origin(Duration::from_secs(secs))
    }

    #[test]
    fn eviction_config_rejects_zeros() {
        assert_eq!(EvictionConfig::new(0, 1), Err(BuildError::ZeroSampleSize));
        assert_eq!(
            EvictionConfig::new(1, 0),
            Err(BuildError::ZeroEvictionAttempts)
        );
        let config = EvictionConfig::new(4, 2).expect("valid config");
        assert_eq!(config.sample_size(), 4);
        assert_eq!(config.max_attempts(), 2);
    }

    #[test]
    fn closures_are_vetoes_and_prioritizers() {
        let veto = |_k: &u32, v: &u32| *v > 10;
        assert!(veto.vetoes(&1, &11));
        assert!(!veto.vetoes(&1, &9));

        let by_value = |_k1: &u32, v1: &u32, _k2: &u32, v2: &u32| v1.cmp(v2);
        assert_eq!(by_value.compare(&1, &5, &2, &7), Ordering::Less);
    }

    #[test]
    fn time_to_live_only() {
        let policy = ExpiryPolicy::new(Some(Duration::from_secs(10)), None);
        assert_eq!(
            Expiry::<u32, u32>::expire_after_create(&policy, &0, &0, at(0)),
            Some(Duration::from_secs(10))
        );
        // Reads do not extend a time-to-live.
        let remaining = Some(Duration::from_secs(4));
        assert_eq!(
            Expiry::<u32, u32>::expire_after_read(&policy, &0, &0, at(6), remaining, at(0)),
            remaining
        );
    }

    #[test]
    fn time_to_idle_is_capped_by_time_to_live() {
        let policy = ExpiryPolicy::new(Some(Duration::from_secs(10)), Some(Duration::from_secs(3)));
        assert_eq!(
            Expiry::<u32, u32>::expire_after_create(&policy, &0, &0, at(0)),
            Some(Duration::from_secs(3))
        );
        // Read at 2s: idle resets to 3s.
        assert_eq!(
            Expiry::<u32, u32>::expire_after_read(&policy, &0, &0, at(2), None, at(0)),
            Some(Duration::from_secs(3))
        );
        // Read at 8s: only 2s of the time-to-live remain.
        assert_eq!(
            Expiry::<u32, u32>::expire_after_read(&policy, &0, &0, at(8), None, at(0)),
            Some(Duration::from_secs(2))
        );
    }
}
