use std::sync::Arc;

pub(crate) mod concurrent;
pub(crate) mod error;
pub(crate) mod time;

#[cfg(test)]
pub(crate) mod test_utils;

/// Computes the weight of an entry. The weights of all live entries are
/// summed up and compared against the store's maximum capacity.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync + 'static>;

// Ensures the value fits in a range of `1..=u64::MAX`. A zero weight would let an
// unbounded number of entries share a single unit of capacity.
pub(crate) fn clamp_weight(weight: u32) -> u64 {
    (weight as u64).max(1)
}
