use super::{
    builder::StoreConfig,
    entry_map::{Candidate, EntryMap, Sample, Slot},
    fault::{Fault, Resolution},
    stats::{StatsCounter, StoreStats},
    value_holder::ValueHolder,
};
use crate::{
    common::{
        clamp_weight,
        concurrent::constants::MAX_ABANDONED_FAULT_RETRIES,
        error::SharedError,
        time::{deadline_after, Instant, SharedTimeSource},
        Weigher,
    },
    copier::{Copier, SharedCopier},
    notification::{EvictionListener, RemovalCause},
    policy::{EvictionConfig, EvictionPrioritizer, EvictionVeto, Expiry, StorePolicy},
    time::TimeSource,
    BuildError, StoreError,
};

use std::{
    collections::hash_map::RandomState,
    convert::Infallible,
    error::Error,
    fmt,
    hash::{BuildHasher, Hash},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

#[cfg(test)]
use std::sync::atomic::AtomicUsize;

use triomphe::Arc as TrioArc;

/// A thread-safe, on-heap key-value store bounded by the total weight of its
/// entries.
///
/// When an insertion takes the store over its capacity, the store draws a
/// small random sample of live entries and evicts one of them, repeating until
/// the store fits again. An optional [`EvictionVeto`][veto] protects entries
/// from being chosen, and an optional [`EvictionPrioritizer`][prioritizer]
/// picks the victim among the sampled candidates. Expired entries found by
/// the sampler are always evicted first.
///
/// Expiration is lazy: an entry whose deadline has passed is treated as
/// absent and removed by the first operation that touches it.
///
/// # Computations
///
/// [`compute_if_absent`](#method.compute_if_absent) and
/// [`compute`](#method.compute) run the mapping function exactly once per
/// key at a time. While it runs, the key's slot holds a _fault_; other
/// threads asking for the same key block until the fault is resolved, and
/// threads using other keys are not blocked at all. The mapping function is
/// called without any lock held, so it may be slow or use the store itself.
///
/// A blocked thread that runs inside an [`interrupt::scope`][scope] whose
/// interrupter is tripped stops waiting and gets
/// `StoreError::Interrupted`.
///
/// # Examples
///
/// ```rust
/// use heapcache::StoreBuilder;
///
/// use std::thread;
///
/// let store = StoreBuilder::new(1_000).build();
///
/// let handles: Vec<_> = (0..4)
///     .map(|i| {
///         let store = store.clone();
///         thread::spawn(move || {
///             // Only one thread runs the closure for key 0.
///             let v = store
///                 .compute_if_absent(0, |_key| Some(format!("computed by {i}")))
///                 .expect("not interrupted");
///             assert!(v.unwrap().starts_with("computed by"));
///         })
///     })
///     .collect();
///
/// handles.into_iter().for_each(|h| h.join().unwrap());
/// assert_eq!(store.entry_count(), 1);
/// ```
///
/// [veto]: ../policy/trait.EvictionVeto.html
/// [prioritizer]: ../policy/trait.EvictionPrioritizer.html
/// [scope]: ../interrupt/fn.scope.html
pub struct OnHeapStore<K, V, S = RandomState> {
    inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for OnHeapStore<K, V, S> {
    /// Makes a clone of this shared store.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> fmt::Debug for OnHeapStore<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnHeapStore")
            .field("name", &self.inner.name)
            .field("max_capacity", &self.inner.max_capacity)
            .field("entry_count", &self.inner.map.entry_count())
            .field("weighted_size", &self.inner.map.weighted_size())
            .finish()
    }
}

impl<K, V, S> OnHeapStore<K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    /// Creates a store from every one of its collaborators.
    ///
    /// Most users want the [`StoreBuilder`][builder-struct] instead. Without a
    /// key copier, keys are moved into the store as they are.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::ZeroSegments` if `config.num_segments` is zero.
    ///
    /// [builder-struct]: ./struct.StoreBuilder.html
    #[allow(clippy::too_many_arguments)]
    pub fn with_everything(
        config: StoreConfig<K, V>,
        veto: Option<Arc<dyn EvictionVeto<K, V>>>,
        prioritizer: Option<Arc<dyn EvictionPrioritizer<K, V>>>,
        expiry: Option<Arc<dyn Expiry<K, V>>>,
        time_source: Arc<dyn TimeSource>,
        key_copier: Option<Arc<dyn Copier<K>>>,
        value_copier: Arc<dyn Copier<V>>,
        build_hasher: S,
    ) -> Result<Self, BuildError> {
        if config.num_segments == 0 {
            return Err(BuildError::ZeroSegments);
        }
        Ok(Self::from_parts(
            config,
            veto,
            prioritizer,
            expiry,
            time_source,
            key_copier,
            value_copier,
            build_hasher,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        config: StoreConfig<K, V>,
        veto: Option<Arc<dyn EvictionVeto<K, V>>>,
        prioritizer: Option<Arc<dyn EvictionPrioritizer<K, V>>>,
        expiry: Option<Arc<dyn Expiry<K, V>>>,
        time_source: SharedTimeSource,
        key_copier: Option<SharedCopier<K>>,
        value_copier: SharedCopier<V>,
        build_hasher: S,
    ) -> Self {
        let map = EntryMap::with_num_segments_and_hasher(
            config.num_segments,
            config.initial_capacity.unwrap_or_default(),
            build_hasher,
        );
        Self {
            inner: Arc::new(Inner {
                name: config.name,
                map,
                max_capacity: config.max_capacity,
                weigher: config.weigher,
                eviction: config.eviction,
                veto,
                prioritizer,
                expiry,
                time_source,
                key_copier,
                value_copier,
                listener: config.eviction_listener,
                listener_enabled: AtomicBool::new(true),
                stats: StatsCounter::default(),
                #[cfg(test)]
                enforce_capacity_calls: AtomicUsize::default(),
            }),
        }
    }

    /// Returns the name of the store, if it was given one.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns the store's configuration.
    pub fn policy(&self) -> StorePolicy {
        let inner = &self.inner;
        StorePolicy::new(
            inner.max_capacity,
            inner.map.num_segments(),
            inner.eviction,
            inner.veto.is_some(),
            inner.prioritizer.is_some(),
        )
    }

    /// Returns a snapshot of the store's statistics.
    pub fn stats(&self) -> StoreStats {
        self.inner.stats.snapshot()
    }

    /// Returns the number of live entries. Keys being computed are not
    /// counted. Expired entries are counted until something removes them.
    pub fn entry_count(&self) -> u64 {
        self.inner.map.entry_count()
    }

    /// Returns the total weight of the live entries.
    pub fn weighted_size(&self) -> u64 {
        self.inner.map.weighted_size()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Returns `true` if the store holds a live, unexpired value for the key.
    ///
    /// Unlike `get`, this method never blocks, does not touch the access
    /// metadata of the entry, and returns `false` for a key being computed.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.inner.now();
        matches!(self.inner.map.get(key), Some(Slot::Holder(h)) if !h.is_expired(now))
    }

    /// Returns a copy of the value for the key, or `None` if there is no
    /// live value.
    ///
    /// If the value is being computed by another thread, blocks until the
    /// computation is over.
    ///
    /// # Errors
    ///
    /// - `StoreError::Interrupted` if the calling thread was interrupted while
    ///   blocked.
    /// - `StoreError::Panicked` if the computations of the key kept panicking.
    pub fn get(&self, key: &K) -> Result<Option<V>, StoreError> {
        let inner = &*self.inner;
        let mut retries = 0;
        loop {
            let now = inner.now();
            match inner.map.get(key) {
                None => {
                    inner.stats.record_miss();
                    return Ok(None);
                }
                Some(Slot::Holder(holder)) => {
                    if holder.is_expired(now) {
                        inner.remove_expired(key, &holder);
                        inner.stats.record_miss();
                        return Ok(None);
                    }
                    inner.record_read(key, &holder, now);
                    return Ok(Some(inner.read_value(&holder)));
                }
                Some(Slot::Fault(fault)) => match fault.wait()? {
                    Resolution::Ready(holder) => {
                        inner.record_read(key, &holder, inner.now());
                        return Ok(Some(inner.read_value(&holder)));
                    }
                    Resolution::Absent | Resolution::Failed(_) => {
                        inner.stats.record_miss();
                        return Ok(None);
                    }
                    Resolution::Restored => (),
                    Resolution::Retry => retry_abandoned(&mut retries)?,
                },
            }
        }
    }

    /// Puts the value for the key, replacing any previous value, then evicts
    /// entries if the store went over its capacity.
    ///
    /// If the key is being computed, the computation's result will not be
    /// installed.
    pub fn put(&self, key: K, value: V) {
        let inner = &*self.inner;
        let key = inner.store_key(key);
        let now = inner.now();
        let replaced = {
            let mut segment = inner.map.write(&key);
            let previous = match segment.get(&key) {
                Some(Slot::Holder(h)) if !h.is_expired(now) => Some(TrioArc::clone(h)),
                _ => None,
            };
            let holder = inner.new_holder(&key, &value, previous.as_deref(), now);
            segment.insert(Arc::clone(&key), Slot::Holder(holder))
        };
        inner.notify_overwritten(key, replaced, now);
        inner.enforce_capacity();
    }

    /// Puts the value for the key only if there is no live value, and returns
    /// `None`. Otherwise returns a copy of the existing value.
    ///
    /// Blocks while the key is being computed.
    ///
    /// # Errors
    ///
    /// See [`get`](#method.get).
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>, StoreError> {
        let inner = &*self.inner;
        let key = inner.store_key(key);
        let mut retries = 0;
        loop {
            let now = inner.now();
            let (current, expired) = {
                let mut segment = inner.map.write(&key);
                match segment.get(&key).cloned() {
                    Some(Slot::Holder(h)) if !h.is_expired(now) => (Some(Slot::Holder(h)), None),
                    Some(Slot::Fault(f)) => (Some(Slot::Fault(f)), None),
                    _ => {
                        let holder = inner.new_holder(&key, &value, None, now);
                        (None, segment.insert(Arc::clone(&key), Slot::Holder(holder)))
                    }
                }
            };

            match current {
                None => {
                    inner.notify_overwritten(key, expired, now);
                    inner.enforce_capacity();
                    return Ok(None);
                }
                Some(Slot::Holder(holder)) => {
                    inner.record_read(&key, &holder, now);
                    return Ok(Some(inner.read_value(&holder)));
                }
                Some(Slot::Fault(fault)) => match fault.wait()? {
                    Resolution::Ready(holder) => {
                        inner.record_read(&key, &holder, inner.now());
                        return Ok(Some(inner.read_value(&holder)));
                    }
                    Resolution::Absent | Resolution::Failed(_) | Resolution::Restored => (),
                    Resolution::Retry => retry_abandoned(&mut retries)?,
                },
            }
        }
    }

    /// Replaces the value for the key only if there is a live value, and
    /// returns a copy of the replaced value.
    ///
    /// Blocks while the key is being computed.
    ///
    /// # Errors
    ///
    /// See [`get`](#method.get).
    pub fn replace(&self, key: K, value: V) -> Result<Option<V>, StoreError> {
        self.replace_when(key, value, |_| true)
            .map(|replaced| replaced.map(|holder| self.inner.read_value(&holder)))
    }

    /// Replaces the value for the key only if its live value equals
    /// `expected`. Returns `true` if the value was replaced.
    ///
    /// Blocks while the key is being computed.
    ///
    /// # Errors
    ///
    /// See [`get`](#method.get).
    pub fn replace_if_equal(&self, key: K, expected: &V, value: V) -> Result<bool, StoreError>
    where
        V: PartialEq,
    {
        self.replace_when(key, value, |current| current == expected)
            .map(|replaced| replaced.is_some())
    }

    fn replace_when(
        &self,
        key: K,
        value: V,
        mut accepts: impl FnMut(&V) -> bool,
    ) -> Result<Option<TrioArc<ValueHolder<V>>>, StoreError> {
        let inner = &*self.inner;
        let key = inner.store_key(key);
        let mut retries = 0;
        loop {
            let now = inner.now();
            let mut expired = None;
            let outcome = {
                let mut segment = inner.map.write(&key);
                match segment.get(&key).cloned() {
                    Some(Slot::Holder(h)) if h.is_expired(now) => {
                        segment.remove(&key);
                        expired = Some(h);
                        Ok(None)
                    }
                    Some(Slot::Holder(h)) if accepts(h.value()) => {
                        let holder = inner.new_holder(&key, &value, Some(&*h), now);
                        segment.insert(Arc::clone(&key), Slot::Holder(holder));
                        Ok(Some(h))
                    }
                    Some(Slot::Holder(_)) | None => Ok(None),
                    Some(Slot::Fault(f)) => Err(f),
                }
            };
            if let Some(holder) = expired {
                inner.notify(Arc::clone(&key), &holder, RemovalCause::Expired);
            }

            match outcome {
                Ok(Some(replaced)) => {
                    inner.notify(key, &replaced, RemovalCause::Replaced);
                    inner.enforce_capacity();
                    return Ok(Some(replaced));
                }
                Ok(None) => return Ok(None),
                Err(fault) => {
                    if let Resolution::Retry = fault.wait()? {
                        retry_abandoned(&mut retries)?;
                    }
                }
            }
        }
    }

    /// Removes the key and returns a copy of its live value, if any.
    ///
    /// Never blocks. Removing a key that is being computed discards the
    /// computation's result.
    pub fn remove(&self, key: &K) -> Option<V> {
        let inner = &*self.inner;
        let now = inner.now();
        let removed = inner.map.write(key).remove(key);
        match removed {
            Some((key, Slot::Holder(holder))) => {
                if holder.is_expired(now) {
                    inner.notify(key, &holder, RemovalCause::Expired);
                    None
                } else {
                    inner.notify(key, &holder, RemovalCause::Explicit);
                    Some(inner.read_value(&holder))
                }
            }
            Some((_, Slot::Fault(_))) | None => None,
        }
    }

    /// Removes the key only if its live value equals `value`. Returns `true`
    /// if the entry was removed.
    pub fn remove_if_equal(&self, key: &K, value: &V) -> bool
    where
        V: PartialEq,
    {
        let inner = &*self.inner;
        let now = inner.now();
        let removed = inner.map.remove_if(key, |slot| {
            matches!(slot, Slot::Holder(h) if !h.is_expired(now) && h.value() == value)
        });
        match removed {
            Some((key, Slot::Holder(holder))) => {
                inner.notify(key, &holder, RemovalCause::Explicit);
                true
            }
            _ => false,
        }
    }

    /// Removes every entry without notifying the eviction listener.
    ///
    /// Computations in flight are not stopped, but their results will not be
    /// installed.
    pub fn clear(&self) {
        self.inner.map.clear();
    }

    /// Returns a copy of the live value for the key. If there is none, calls
    /// `mapping` to compute one and installs it.
    ///
    /// Only one thread at a time runs a mapping function for a given key; the
    /// others block and receive its result. When `mapping` returns `None`,
    /// nothing is installed and `None` is returned.
    ///
    /// # Errors
    ///
    /// See [`get`](#method.get).
    pub fn compute_if_absent(
        &self,
        key: K,
        mapping: impl FnOnce(&K) -> Option<V>,
    ) -> Result<Option<V>, StoreError> {
        self.try_compute_if_absent(key, |k| Ok::<_, Infallible>(mapping(k)))
    }

    /// Like [`compute_if_absent`](#method.compute_if_absent), with a fallible
    /// mapping function.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ComputationFailure` wrapping the error of
    /// `mapping`. The store is left as it was before the call. Threads that
    /// were waiting for the same key get the same error. See also
    /// [`get`](#method.get).
    pub fn try_compute_if_absent<E>(
        &self,
        key: K,
        mapping: impl FnOnce(&K) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, StoreError>
    where
        E: Error + Send + Sync + 'static,
    {
        let inner = &*self.inner;
        let key = inner.store_key(key);
        let mut retries = 0;

        let owner = loop {
            let now = inner.now();
            let mut expired = None;
            let step = {
                let mut segment = inner.map.write(&key);
                match segment.get(&key).cloned() {
                    Some(Slot::Holder(h)) if !h.is_expired(now) => Step::Hit(h),
                    Some(Slot::Fault(f)) => Step::Wait(f),
                    current => {
                        if let Some(Slot::Holder(h)) = current {
                            expired = Some(h);
                        }
                        let fault = TrioArc::new(Fault::new());
                        segment.insert(Arc::clone(&key), Slot::Fault(TrioArc::clone(&fault)));
                        Step::Own(fault, None)
                    }
                }
            };
            if let Some(holder) = expired {
                inner.notify(Arc::clone(&key), &holder, RemovalCause::Expired);
            }

            match step {
                Step::Hit(holder) => {
                    inner.record_read(&key, &holder, now);
                    let value = inner.read_value(&holder);
                    inner.enforce_capacity();
                    return Ok(Some(value));
                }
                Step::Wait(fault) => match fault.wait()? {
                    Resolution::Ready(holder) => {
                        inner.record_read(&key, &holder, inner.now());
                        return Ok(Some(inner.read_value(&holder)));
                    }
                    Resolution::Absent => {
                        inner.stats.record_miss();
                        return Ok(None);
                    }
                    Resolution::Failed(error) => return Err(StoreError::ComputationFailure(error)),
                    Resolution::Restored => (),
                    Resolution::Retry => retry_abandoned(&mut retries)?,
                },
                Step::Own(fault, previous) => {
                    break FaultOwner::new(inner, Arc::clone(&key), fault, previous)
                }
                // Only a compute restricted to present keys skips.
                Step::Skip => unreachable!(),
            }
        };

        inner.stats.record_miss();
        match mapping(&*key) {
            Ok(Some(value)) => {
                inner.stats.record_compute(true);
                let holder = inner.new_holder(&key, &value, None, inner.now());
                let value = inner.read_value(&holder);
                if owner.install(holder) {
                    inner.enforce_capacity();
                }
                Ok(Some(value))
            }
            Ok(None) => {
                inner.stats.record_compute(true);
                owner.vacate(Resolution::Absent);
                Ok(None)
            }
            Err(error) => {
                inner.stats.record_compute(false);
                let error: SharedError = Arc::new(error);
                owner.vacate(Resolution::Failed(SharedError::clone(&error)));
                Err(StoreError::ComputationFailure(error))
            }
        }
    }

    /// Computes a new value for the key from its current live value (`None`
    /// if there is none), and installs it. When `remapping` returns `None`,
    /// the entry is removed.
    ///
    /// Only one thread at a time runs a function for a given key. Threads
    /// that were waiting look the key up again once it is done.
    ///
    /// # Errors
    ///
    /// See [`get`](#method.get).
    pub fn compute(
        &self,
        key: K,
        remapping: impl FnOnce(&K, Option<V>) -> Option<V>,
    ) -> Result<Option<V>, StoreError> {
        self.try_compute(key, |k, v| Ok::<_, Infallible>(remapping(k, v)))
    }

    /// Like [`compute`](#method.compute), with a fallible remapping function.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ComputationFailure` wrapping the error of
    /// `remapping`. The store is left as it was before the call. See also
    /// [`get`](#method.get).
    pub fn try_compute<E>(
        &self,
        key: K,
        remapping: impl FnOnce(&K, Option<V>) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, StoreError>
    where
        E: Error + Send + Sync + 'static,
    {
        self.compute_with(key, false, remapping)
    }

    /// Like [`compute`](#method.compute), but only runs `remapping` if there
    /// is a live value. Returns `None` without calling it otherwise.
    ///
    /// # Errors
    ///
    /// See [`try_compute`](#method.try_compute).
    pub fn compute_if_present(
        &self,
        key: K,
        remapping: impl FnOnce(&K, V) -> Option<V>,
    ) -> Result<Option<V>, StoreError> {
        self.compute_with(key, true, |k, v| {
            Ok::<_, Infallible>(v.and_then(|v| remapping(k, v)))
        })
    }

    fn compute_with<E>(
        &self,
        key: K,
        only_if_present: bool,
        remapping: impl FnOnce(&K, Option<V>) -> Result<Option<V>, E>,
    ) -> Result<Option<V>, StoreError>
    where
        E: Error + Send + Sync + 'static,
    {
        let inner = &*self.inner;
        let key = inner.store_key(key);
        let mut retries = 0;

        let owner = loop {
            let now = inner.now();
            let mut expired = None;
            let step = {
                let mut segment = inner.map.write(&key);
                match segment.get(&key).cloned() {
                    Some(Slot::Fault(f)) => Step::Wait(f),
                    Some(Slot::Holder(h)) if !h.is_expired(now) => {
                        let fault = TrioArc::new(Fault::new());
                        segment.insert(Arc::clone(&key), Slot::Fault(TrioArc::clone(&fault)));
                        Step::Own(fault, Some(h))
                    }
                    current => {
                        if let Some(Slot::Holder(h)) = current {
                            segment.remove(&key);
                            expired = Some(h);
                        }
                        if only_if_present {
                            Step::Skip
                        } else {
                            let fault = TrioArc::new(Fault::new());
                            segment.insert(Arc::clone(&key), Slot::Fault(TrioArc::clone(&fault)));
                            Step::Own(fault, None)
                        }
                    }
                }
            };
            if let Some(holder) = expired {
                inner.notify(Arc::clone(&key), &holder, RemovalCause::Expired);
            }

            match step {
                Step::Own(fault, previous) => {
                    break FaultOwner::new(inner, Arc::clone(&key), fault, previous)
                }
                Step::Wait(fault) => {
                    if let Resolution::Retry = fault.wait()? {
                        retry_abandoned(&mut retries)?;
                    }
                }
                Step::Skip => return Ok(None),
                // A compute always takes the slot over.
                Step::Hit(_) => unreachable!(),
            }
        };

        let previous = owner.previous.clone();
        let current = previous.as_ref().map(|holder| inner.read_value(holder));
        match remapping(&*key, current) {
            Ok(Some(value)) => {
                inner.stats.record_compute(true);
                let holder = inner.new_holder(&key, &value, previous.as_deref(), inner.now());
                let value = inner.read_value(&holder);
                if owner.install(holder) {
                    if let Some(previous) = previous {
                        inner.notify(key, &previous, RemovalCause::Replaced);
                    }
                    inner.enforce_capacity();
                }
                Ok(Some(value))
            }
            Ok(None) => {
                inner.stats.record_compute(true);
                if owner.vacate(Resolution::Absent) {
                    if let Some(previous) = previous {
                        inner.notify(key, &previous, RemovalCause::Explicit);
                    }
                }
                Ok(None)
            }
            Err(error) => {
                inner.stats.record_compute(false);
                let error: SharedError = Arc::new(error);
                if previous.is_some() {
                    // Waiters look the key up again and find the previous value.
                    owner.restore();
                } else {
                    owner.vacate(Resolution::Failed(SharedError::clone(&error)));
                }
                Err(StoreError::ComputationFailure(error))
            }
        }
    }

    #[cfg(test)]
    fn enforce_capacity_calls(&self) -> usize {
        self.inner.enforce_capacity_calls.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn live_keys(&self) -> Vec<Arc<K>> {
        self.inner.map.live_keys()
    }
}

fn retry_abandoned(retries: &mut usize) -> Result<(), StoreError> {
    *retries += 1;
    if *retries < MAX_ABANDONED_FAULT_RETRIES {
        Ok(())
    } else {
        Err(StoreError::Panicked(*retries))
    }
}

enum Step<V> {
    Hit(TrioArc<ValueHolder<V>>),
    Wait(TrioArc<Fault<V>>),
    /// The calling thread installed the fault. Carries the live holder the
    /// fault took the place of.
    Own(TrioArc<Fault<V>>, Option<TrioArc<ValueHolder<V>>>),
    Skip,
}

struct Inner<K, V, S> {
    name: Option<String>,
    map: EntryMap<K, V, S>,
    max_capacity: Option<u64>,
    weigher: Option<Weigher<K, V>>,
    eviction: EvictionConfig,
    veto: Option<Arc<dyn EvictionVeto<K, V>>>,
    prioritizer: Option<Arc<dyn EvictionPrioritizer<K, V>>>,
    expiry: Option<Arc<dyn Expiry<K, V>>>,
    time_source: SharedTimeSource,
    key_copier: Option<SharedCopier<K>>,
    value_copier: SharedCopier<V>,
    listener: Option<EvictionListener<K, V>>,
    /// Cleared for good once the listener panics.
    listener_enabled: AtomicBool,
    stats: StatsCounter,
    #[cfg(test)]
    enforce_capacity_calls: AtomicUsize,
}

impl<K, V, S> Inner<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    #[inline]
    fn now(&self) -> Instant {
        self.time_source.now()
    }

    fn store_key(&self, key: K) -> Arc<K> {
        match &self.key_copier {
            Some(copier) => Arc::new(copier.copy_for_write(&key)),
            None => Arc::new(key),
        }
    }

    #[inline]
    fn read_value(&self, holder: &ValueHolder<V>) -> V {
        self.value_copier.copy_for_read(holder.value())
    }

    fn weigh(&self, key: &K, value: &V) -> u64 {
        self.weigher
            .as_ref()
            .map_or(1, |weigher| clamp_weight(weigher(key, value)))
    }

    /// Builds the holder of a value being written. `previous` is the live
    /// holder being updated, if any.
    fn new_holder(
        &self,
        key: &K,
        value: &V,
        previous: Option<&ValueHolder<V>>,
        now: Instant,
    ) -> TrioArc<ValueHolder<V>> {
        let value = self.value_copier.copy_for_write(value);
        let duration = self.expiry.as_ref().and_then(|expiry| match previous {
            Some(previous) => {
                let remaining = previous.duration_until_expiry(now);
                expiry.expire_after_update(key, &value, now, remaining)
            }
            None => expiry.expire_after_create(key, &value, now),
        });
        let weight = self.weigh(key, &value);
        TrioArc::new(ValueHolder::new(
            value,
            now,
            deadline_after(now, duration),
            weight,
        ))
    }

    fn record_read(&self, key: &K, holder: &ValueHolder<V>, now: Instant) {
        holder.record_access(self.time_source.fast_now());
        if let Some(expiry) = &self.expiry {
            let duration = expiry.expire_after_read(
                key,
                holder.value(),
                now,
                holder.duration_until_expiry(now),
                holder.created_at(),
            );
            holder.set_expiration_deadline(deadline_after(now, duration));
        }
        self.stats.record_hit();
    }

    /// Removes the expired holder unless it has been replaced meanwhile.
    fn remove_expired(&self, key: &K, holder: &TrioArc<ValueHolder<V>>) {
        if let Some((key, _)) = self.map.remove_if(key, |slot| slot.is_holder_of(holder)) {
            self.notify(key, holder, RemovalCause::Expired);
        }
    }

    /// Counts a removal and reports it to the eviction listener. The value is
    /// only copied when there is a listener to receive it.
    fn notify(&self, key: Arc<K>, holder: &ValueHolder<V>, cause: RemovalCause) {
        self.stats.record_removal(holder.policy_weight(), cause);

        let Some(listener) = &self.listener else {
            return;
        };
        if !self.listener_enabled.load(Ordering::Acquire) {
            return;
        }
        let value = self.read_value(holder);
        // The listener is not called again after a panic, so its state cannot
        // be observed broken.
        if let Err(_payload) = catch_unwind(AssertUnwindSafe(|| listener(key, value, cause))) {
            self.listener_enabled.store(false, Ordering::Release);
            #[cfg(feature = "logging")]
            log::error!(
                "{}Disabled the eviction listener because it panicked at '{}'",
                self.log_prefix(),
                crate::common::error::panic_message(&*_payload)
                    .unwrap_or_else(|| "a non-string panic payload".to_string())
            );
        }
    }

    /// Notifies the removal of the slot a write overwrote.
    fn notify_overwritten(&self, key: Arc<K>, overwritten: Option<Slot<V>>, now: Instant) {
        if let Some(Slot::Holder(holder)) = overwritten {
            let cause = if holder.is_expired(now) {
                RemovalCause::Expired
            } else {
                RemovalCause::Replaced
            };
            self.notify(key, &holder, cause);
        }
    }

    /// Evicts sampled entries until the total weight fits in the capacity.
    ///
    /// Gives up after `max_attempts` consecutive draws that evicted nothing,
    /// for example because every candidate was vetoed. The store may then
    /// stay over its capacity until the next write.
    fn enforce_capacity(&self) {
        #[cfg(test)]
        self.enforce_capacity_calls.fetch_add(1, Ordering::AcqRel);

        let Some(max_capacity) = self.max_capacity else {
            return;
        };
        let mut rng = rand::rng();
        let mut failed_attempts = 0;

        while self.map.weighted_size() > max_capacity {
            if failed_attempts >= self.eviction.max_attempts() {
                #[cfg(feature = "logging")]
                log::trace!(
                    "{}Gave up evicting after {} attempts; weighted size {} exceeds {}",
                    self.log_prefix(),
                    failed_attempts,
                    self.map.weighted_size(),
                    max_capacity
                );
                break;
            }

            let sample = self.map.sample(self.eviction.sample_size(), &mut rng);
            let Some(((key, holder), cause)) = self.select_victim(sample, self.now()) else {
                failed_attempts += 1;
                continue;
            };
            match self.map.remove_if(&key, |slot| slot.is_holder_of(&holder)) {
                Some((key, _)) => {
                    failed_attempts = 0;
                    self.notify(key, &holder, cause);
                }
                // Replaced or removed since it was sampled.
                None => failed_attempts += 1,
            }
        }
    }

    /// Picks the entry to evict among the sampled ones. Runs without any lock
    /// held.
    fn select_victim(
        &self,
        mut sample: Sample<K, V>,
        now: Instant,
    ) -> Option<(Candidate<K, V>, RemovalCause)> {
        if let Some(i) = sample.iter().position(|(_, h)| h.is_expired(now)) {
            return Some((sample.swap_remove(i), RemovalCause::Expired));
        }

        let mut candidates = sample.into_iter().filter(|(key, holder)| {
            self.veto
                .as_ref()
                .map_or(true, |veto| !veto.vetoes(key, holder.value()))
        });
        let victim = match &self.prioritizer {
            Some(prioritizer) => candidates.min_by(|(k1, h1), (k2, h2)| {
                prioritizer.compare(k1, h1.value(), k2, h2.value())
            }),
            None => candidates.next(),
        };
        victim.map(|candidate| (candidate, RemovalCause::Size))
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        self.name
            .as_ref()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default()
    }
}

/// The right, and the duty, to resolve a fault installed by the current
/// thread.
///
/// Dropping an owner that was not consumed (the mapping function panicked)
/// puts the key back the way it was and tells the waiters to retry.
struct FaultOwner<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    inner: &'a Inner<K, V, S>,
    key: Arc<K>,
    fault: TrioArc<Fault<V>>,
    previous: Option<TrioArc<ValueHolder<V>>>,
    armed: bool,
}

impl<'a, K, V, S> FaultOwner<'a, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    fn new(
        inner: &'a Inner<K, V, S>,
        key: Arc<K>,
        fault: TrioArc<Fault<V>>,
        previous: Option<TrioArc<ValueHolder<V>>>,
    ) -> Self {
        Self {
            inner,
            key,
            fault,
            previous,
            armed: true,
        }
    }

    /// Replaces the fault with `holder` and hands `holder` to the waiters.
    /// Returns `false` if the fault was overwritten or removed meanwhile, in
    /// which case the store is left untouched.
    fn install(mut self, holder: TrioArc<ValueHolder<V>>) -> bool {
        self.armed = false;
        let mut segment = self.inner.map.write(&self.key);
        let owned = segment
            .get(&self.key)
            .map_or(false, |slot| slot.is_fault_of(&self.fault));
        if owned {
            segment.insert(Arc::clone(&self.key), Slot::Holder(TrioArc::clone(&holder)));
        }
        self.fault.resolve(Resolution::Ready(holder));
        owned
    }

    /// Removes the fault, leaving the key absent. Returns `false` if the fault
    /// was overwritten or removed meanwhile.
    fn vacate(mut self, resolution: Resolution<V>) -> bool {
        self.armed = false;
        let mut segment = self.inner.map.write(&self.key);
        let owned = segment
            .get(&self.key)
            .map_or(false, |slot| slot.is_fault_of(&self.fault));
        if owned {
            segment.remove(&self.key);
        }
        self.fault.resolve(resolution);
        owned
    }

    /// Puts the previous holder back in place of the fault after a failed
    /// update. Waiters look the key up again and find the previous value.
    fn restore(mut self) {
        self.restore_in_place(Resolution::Restored);
    }

    /// Puts the previous holder back in place of the fault, or removes the
    /// fault if there was none.
    fn restore_in_place(&mut self, resolution: Resolution<V>) {
        self.armed = false;
        let mut segment = self.inner.map.write(&self.key);
        let owned = segment
            .get(&self.key)
            .map_or(false, |slot| slot.is_fault_of(&self.fault));
        if owned {
            match &self.previous {
                Some(previous) => {
                    segment.insert(Arc::clone(&self.key), Slot::Holder(TrioArc::clone(previous)));
                }
                None => {
                    segment.remove(&self.key);
                }
            }
        }
        self.fault.resolve(resolution);
    }
}

impl<K, V, S> Drop for FaultOwner<'_, K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    fn drop(&mut self) {
        if self.armed {
            self.restore_in_place(Resolution::Retry);
        }
    }
}
