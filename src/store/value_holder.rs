use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::common::time::{AtomicInstant, Instant};

/// A stored value and its bookkeeping.
///
/// The value itself never changes once the holder is built; an update builds
/// a new holder. Only the access metadata and the expiration deadline move.
pub(crate) struct ValueHolder<V> {
    value: V,
    created_at: Instant,
    last_accessed_at: AtomicInstant,
    hits: AtomicU64,
    expires_at: AtomicInstant,
    policy_weight: u64,
}

impl<V> fmt::Debug for ValueHolder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHolder")
            .field("created_at", &self.created_at)
            .field("last_accessed_at", &self.last_accessed_at.instant())
            .field("hits", &self.hits())
            .field("expires_at", &self.expires_at.instant())
            .field("policy_weight", &self.policy_weight)
            .finish()
    }
}

impl<V> ValueHolder<V> {
    pub(crate) fn new(
        value: V,
        created_at: Instant,
        expires_at: Option<Instant>,
        policy_weight: u64,
    ) -> Self {
        Self {
            value,
            created_at,
            last_accessed_at: AtomicInstant::new(Some(created_at)),
            hits: AtomicU64::new(0),
            expires_at: AtomicInstant::new(expires_at),
            policy_weight,
        }
    }

    pub(crate) fn value(&self) -> &V {
        &self.value
    }

    /// The time the value was put into the store. Updates build new holders,
    /// so this is also the time it was last modified.
    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at.instant().unwrap_or(self.created_at)
    }

    pub(crate) fn hits(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    pub(crate) fn set_expiration_deadline(&self, deadline: Option<Instant>) {
        self.expires_at.set(deadline);
    }

    pub(crate) fn policy_weight(&self) -> u64 {
        self.policy_weight
    }

    /// An entry is expired once `now` reaches its deadline.
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at
            .instant()
            .map_or(false, |deadline| deadline <= now)
    }

    /// Returns the remaining duration until the entry expires, or `None` if
    /// the entry does not expire.
    pub(crate) fn duration_until_expiry(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .instant()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub(crate) fn record_access(&self, at: Instant) {
        self.hits.fetch_add(1, Ordering::AcqRel);
        self.last_accessed_at.advance_to(at);
    }
}

#[cfg(test)]
mod tests {
    use super::ValueHolder;
    use crate::common::time::Instant;
    use std::time::Duration;

    fn at(millis: u64) -> Instant {
        Instant::from_duration_since_origin(Duration::from_millis(millis))
    }

    #[test]
    fn expires_at_its_deadline() {
        let holder = ValueHolder::new("v", at(0), Some(at(1_000)), 1);
        assert!(!holder.is_expired(at(999)));
        assert!(holder.is_expired(at(1_000)));
        assert_eq!(
            holder.duration_until_expiry(at(400)),
            Some(Duration::from_millis(600))
        );

        let eternal = ValueHolder::new("v", at(0), None, 1);
        assert!(!eternal.is_expired(at(u64::MAX / 2_000_000)));
        assert_eq!(eternal.duration_until_expiry(at(400)), None);
    }

    #[test]
    fn access_metadata() {
        let holder = ValueHolder::new(7, at(10), None, 3);
        assert_eq!(holder.hits(), 0);
        assert_eq!(holder.last_accessed_at(), at(10));

        holder.record_access(at(50));
        holder.record_access(at(20));
        assert_eq!(holder.hits(), 2);
        assert_eq!(holder.last_accessed_at(), at(50));
        assert_eq!(holder.created_at(), at(10));
        assert_eq!(*holder.value(), 7);
        assert_eq!(holder.policy_weight(), 3);
    }
}
