use std::{
    collections::HashMap,
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockWriteGuard};
use rand::Rng;
use smallvec::SmallVec;
use triomphe::Arc as TrioArc;

use super::{fault::Fault, value_holder::ValueHolder};

/// The content of a key's slot: either a live value or a pending computation.
pub(crate) enum Slot<V> {
    Holder(TrioArc<ValueHolder<V>>),
    Fault(TrioArc<Fault<V>>),
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Holder(h) => Self::Holder(TrioArc::clone(h)),
            Self::Fault(f) => Self::Fault(TrioArc::clone(f)),
        }
    }
}

impl<V> Slot<V> {
    pub(crate) fn is_fault_of(&self, fault: &TrioArc<Fault<V>>) -> bool {
        matches!(self, Self::Fault(f) if TrioArc::ptr_eq(f, fault))
    }

    pub(crate) fn is_holder_of(&self, holder: &TrioArc<ValueHolder<V>>) -> bool {
        matches!(self, Self::Holder(h) if TrioArc::ptr_eq(h, holder))
    }

    /// Faults weigh nothing. They are not live entries.
    fn policy_weight(&self) -> Option<u64> {
        match self {
            Self::Holder(h) => Some(h.policy_weight()),
            Self::Fault(_) => None,
        }
    }
}

/// A live entry drawn by [`EntryMap::sample`].
pub(crate) type Candidate<K, V> = (Arc<K>, TrioArc<ValueHolder<V>>);

pub(crate) type Sample<K, V> = SmallVec<[Candidate<K, V>; 8]>;

/// The slots of one segment, stored densely so a random slot can be picked in
/// constant time. `index` maps each key to its position in `slots`.
struct Segment<K, V, S> {
    index: HashMap<Arc<K>, usize, S>,
    slots: Vec<(Arc<K>, Slot<V>)>,
}

impl<K, V, S> Segment<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            index: HashMap::with_capacity_and_hasher(capacity, hasher),
            slots: Vec::with_capacity(capacity),
        }
    }

    fn get(&self, key: &K) -> Option<&Slot<V>> {
        self.index.get(key).map(|&i| &self.slots[i].1)
    }

    fn insert(&mut self, key: Arc<K>, slot: Slot<V>) -> Option<Slot<V>> {
        if let Some(&i) = self.index.get(&*key) {
            Some(std::mem::replace(&mut self.slots[i].1, slot))
        } else {
            self.index.insert(Arc::clone(&key), self.slots.len());
            self.slots.push((key, slot));
            None
        }
    }

    fn remove(&mut self, key: &K) -> Option<(Arc<K>, Slot<V>)> {
        let i = self.index.remove(key)?;
        let removed = self.slots.swap_remove(i);
        // The last slot took the place of the removed one.
        if let Some((moved_key, _)) = self.slots.get(i) {
            if let Some(pos) = self.index.get_mut(&**moved_key) {
                *pos = i;
            }
        }
        Some(removed)
    }
}

/// The live entry count and total weight of the map. Both are only modified
/// while the write lock of the segment being changed is held.
#[derive(Default)]
struct Counters {
    entry_count: AtomicU64,
    weighted_size: AtomicU64,
}

impl Counters {
    fn added<V>(&self, slot: &Slot<V>) {
        if let Some(weight) = slot.policy_weight() {
            self.entry_count.fetch_add(1, Ordering::AcqRel);
            self.weighted_size.fetch_add(weight, Ordering::AcqRel);
        }
    }

    fn removed<V>(&self, slot: &Slot<V>) {
        if let Some(weight) = slot.policy_weight() {
            self.entry_count.fetch_sub(1, Ordering::AcqRel);
            self.weighted_size.fetch_sub(weight, Ordering::AcqRel);
        }
    }
}

/// The store's concurrent map of key to [`Slot`], split into independently
/// locked segments.
pub(crate) struct EntryMap<K, V, S> {
    segments: Box<[CachePadded<RwLock<Segment<K, V, S>>>]>,
    build_hasher: S,
    counters: Counters,
}

impl<K, V, S> fmt::Debug for EntryMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryMap")
            .field("num_segments", &self.segments.len())
            .field(
                "entry_count",
                &self.counters.entry_count.load(Ordering::Acquire),
            )
            .finish()
    }
}

impl<K, V, S> EntryMap<K, V, S> {
    pub(crate) fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.counters.entry_count.load(Ordering::Acquire)
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.counters.weighted_size.load(Ordering::Acquire)
    }
}

impl<K, V, S> EntryMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    /// # Panics
    ///
    /// Panics if `num_segments` is zero.
    pub(crate) fn with_num_segments_and_hasher(
        num_segments: usize,
        initial_capacity: usize,
        build_hasher: S,
    ) -> Self {
        assert!(num_segments > 0);

        let per_segment = (initial_capacity + num_segments - 1) / num_segments;
        let segments = (0..num_segments)
            .map(|_| {
                let segment = Segment::with_capacity_and_hasher(per_segment, build_hasher.clone());
                CachePadded::new(RwLock::new(segment))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            segments,
            build_hasher,
            counters: Counters::default(),
        }
    }

    #[inline]
    fn segment_of(&self, key: &K) -> &RwLock<Segment<K, V, S>> {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        // Use the upper bits; the segment's own hash map indexes by the lower ones.
        let index = (hasher.finish() >> 32) as usize % self.segments.len();
        &self.segments[index]
    }

    /// Returns a snapshot of the key's slot.
    pub(crate) fn get(&self, key: &K) -> Option<Slot<V>> {
        self.segment_of(key).read().get(key).cloned()
    }

    /// Locks the key's segment for writing.
    pub(crate) fn write(&self, key: &K) -> SegmentWriter<'_, K, V, S> {
        SegmentWriter {
            segment: self.segment_of(key).write(),
            counters: &self.counters,
        }
    }

    /// Removes the key's slot if `predicate` accepts it.
    pub(crate) fn remove_if(
        &self,
        key: &K,
        predicate: impl FnOnce(&Slot<V>) -> bool,
    ) -> Option<(Arc<K>, Slot<V>)> {
        let mut writer = self.write(key);
        if writer.get(key).map_or(false, predicate) {
            writer.remove(key)
        } else {
            None
        }
    }

    /// Draws up to `sample_size` live entries at random.
    ///
    /// Each draw picks a random segment, walks forward to the first non-empty
    /// one and picks a random slot in it. Faults are skipped without being
    /// dereferenced, so a draw that lands on one yields nothing. The cost is
    /// bounded by the number of segments, whatever the size of the map.
    pub(crate) fn sample(&self, sample_size: usize, rng: &mut impl Rng) -> Sample<K, V> {
        let mut sample = Sample::new();
        let n = self.segments.len();

        for _ in 0..sample_size {
            let start = rng.random_range(0..n);
            for offset in 0..n {
                let segment = self.segments[(start + offset) % n].read();
                if segment.slots.is_empty() {
                    continue;
                }
                let (key, slot) = &segment.slots[rng.random_range(0..segment.slots.len())];
                if let Slot::Holder(holder) = slot {
                    sample.push((Arc::clone(key), TrioArc::clone(holder)));
                }
                break;
            }
        }
        sample
    }

    /// Removes every slot, including pending faults.
    pub(crate) fn clear(&self) {
        for segment in self.segments.iter() {
            let mut segment = segment.write();
            for (_, slot) in segment.slots.drain(..) {
                self.counters.removed(&slot);
            }
            segment.index.clear();
        }
    }

    /// Returns a snapshot of every live entry. Used by tests to check
    /// invariants.
    #[cfg(test)]
    pub(crate) fn live_keys(&self) -> Vec<Arc<K>> {
        self.segments
            .iter()
            .flat_map(|segment| {
                segment
                    .read()
                    .slots
                    .iter()
                    .filter(|(_, slot)| matches!(slot, Slot::Holder(_)))
                    .map(|(k, _)| Arc::clone(k))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// A write lock on one segment. Every structural change made through it
/// updates the map's counters before the lock is released.
pub(crate) struct SegmentWriter<'a, K, V, S> {
    segment: RwLockWriteGuard<'a, Segment<K, V, S>>,
    counters: &'a Counters,
}

impl<'a, K, V, S> SegmentWriter<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub(crate) fn get(&self, key: &K) -> Option<&Slot<V>> {
        self.segment.get(key)
    }

    /// Puts `slot` into the key's slot and returns the replaced one.
    pub(crate) fn insert(&mut self, key: Arc<K>, slot: Slot<V>) -> Option<Slot<V>> {
        self.counters.added(&slot);
        let old = self.segment.insert(key, slot);
        if let Some(old) = &old {
            self.counters.removed(old);
        }
        old
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<(Arc<K>, Slot<V>)> {
        let removed = self.segment.remove(key);
        if let Some((_, slot)) = &removed {
            self.counters.removed(slot);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryMap, Slot};
    use crate::{
        common::time::Instant,
        store::{fault::Fault, value_holder::ValueHolder},
    };
    use std::{collections::hash_map::RandomState, collections::HashSet, sync::Arc};
    use triomphe::Arc as TrioArc;

    fn holder(v: u32, weight: u64) -> Slot<u32> {
        Slot::Holder(TrioArc::new(ValueHolder::new(v, Instant::ZERO, None, weight)))
    }

    fn map(num_segments: usize) -> EntryMap<u32, u32, RandomState> {
        EntryMap::with_num_segments_and_hasher(num_segments, 0, RandomState::new())
    }

    #[test]
    fn counters_track_live_entries_only() {
        let map = map(4);

        map.write(&1).insert(Arc::new(1), holder(10, 3));
        map.write(&2)
            .insert(Arc::new(2), Slot::Fault(TrioArc::new(Fault::new())));
        assert_eq!(map.entry_count(), 1);
        assert_eq!(map.weighted_size(), 3);

        // Replace the fault with a holder.
        map.write(&2).insert(Arc::new(2), holder(20, 2));
        assert_eq!(map.entry_count(), 2);
        assert_eq!(map.weighted_size(), 5);

        // Replace a holder with a heavier one.
        map.write(&1).insert(Arc::new(1), holder(11, 7));
        assert_eq!(map.entry_count(), 2);
        assert_eq!(map.weighted_size(), 9);

        assert!(map.remove_if(&1, |_| false).is_none());
        assert!(map.remove_if(&1, |_| true).is_some());
        assert_eq!(map.entry_count(), 1);
        assert_eq!(map.weighted_size(), 2);

        map.clear();
        assert_eq!(map.entry_count(), 0);
        assert_eq!(map.weighted_size(), 0);
        assert!(map.get(&2).is_none());
    }

    #[test]
    fn swap_remove_keeps_the_index_consistent() {
        let map = map(1);
        for i in 0..10 {
            map.write(&i).insert(Arc::new(i), holder(i * 10, 1));
        }
        for i in (0..10).step_by(3) {
            assert!(map.write(&i).remove(&i).is_some());
        }
        for i in 0..10 {
            match map.get(&i) {
                Some(Slot::Holder(h)) => {
                    assert_ne!(i % 3, 0);
                    assert_eq!(*h.value(), i * 10);
                }
                Some(Slot::Fault(_)) => panic!("unexpected fault"),
                None => assert_eq!(i % 3, 0),
            }
        }
        assert_eq!(map.entry_count(), 6);
    }

    #[test]
    fn sample_never_contains_faults() {
        let map = map(8);
        for i in 0..100 {
            let slot = if i % 2 == 0 {
                holder(i, 1)
            } else {
                Slot::Fault(TrioArc::new(Fault::new()))
            };
            map.write(&i).insert(Arc::new(i), slot);
        }

        let mut rng = rand::rng();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            for (key, holder) in map.sample(8, &mut rng) {
                assert_eq!(*key % 2, 0);
                assert_eq!(*holder.value(), *key);
                seen.insert(*key);
            }
        }
        // Sampling is spread over many keys.
        assert!(seen.len() > 10);
    }

    #[test]
    fn sample_finds_the_only_entry() {
        let map = map(64);
        map.write(&42).insert(Arc::new(42), holder(1, 1));
        let mut rng = rand::rng();
        let sample = map.sample(1, &mut rng);
        assert_eq!(sample.len(), 1);
        assert_eq!(*sample[0].0, 42);
        assert_eq!(map.live_keys().len(), 1);
    }
}
