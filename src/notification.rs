//! Removal notifications.
//!
//! An eviction listener is called synchronously on the thread that removed the
//! entry, after the entry's slot has been released. It should return quickly;
//! hand anything slow over to a [`PartitionedExecutor`][executor].
//!
//! A listener that panics is disabled for the rest of the store's life.
//!
//! [executor]: ../executor/struct.PartitionedExecutor.html

use std::sync::Arc;

/// A listener for entries removed from a store. It receives the key, the value
/// and the cause of the removal.
pub type EvictionListener<K, V> = Arc<dyn Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static>;

/// Indicates the reason why a stored entry was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// The entry's expiration deadline has passed.
    Expired,
    /// The entry was manually removed by the user.
    Explicit,
    /// The entry itself was not actually removed, but its value was replaced by
    /// the user.
    Replaced,
    /// The entry was evicted to bring the store back under its capacity.
    Size,
}

impl RemovalCause {
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Expired | Self::Size)
    }
}
