use super::OnHeapStore;
use crate::{
    common::{concurrent::constants::DEFAULT_NUM_SEGMENTS, time::SharedTimeSource, Weigher},
    copier::{Copier, IdentityCopier, SharedCopier},
    notification::{EvictionListener, RemovalCause},
    policy::{EvictionConfig, EvictionPrioritizer, EvictionVeto, Expiry, ExpiryPolicy},
    time::{SystemTimeSource, TimeSource},
};

use std::{
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
    time::Duration,
};

/// The capacity related part of a store's configuration.
///
/// [`StoreBuilder`][builder-struct] fills one in for you. Build one by hand
/// only when calling [`OnHeapStore::with_everything`][with-everything].
///
/// [builder-struct]: ./struct.StoreBuilder.html
/// [with-everything]: ./struct.OnHeapStore.html#method.with_everything
pub struct StoreConfig<K, V> {
    /// A name used as a prefix of the store's log messages.
    pub name: Option<String>,
    /// The maximum total weight of the live entries. `None` for unbounded.
    pub max_capacity: Option<u64>,
    pub initial_capacity: Option<usize>,
    /// The number of independently locked segments of the entry map.
    pub num_segments: usize,
    /// Weighs entries. Without one, every entry weighs `1`.
    pub weigher: Option<Weigher<K, V>>,
    pub eviction: EvictionConfig,
    pub eviction_listener: Option<EvictionListener<K, V>>,
}

impl<K, V> Default for StoreConfig<K, V> {
    fn default() -> Self {
        Self {
            name: None,
            max_capacity: None,
            initial_capacity: None,
            num_segments: DEFAULT_NUM_SEGMENTS,
            weigher: None,
            eviction: EvictionConfig::default(),
            eviction_listener: None,
        }
    }
}

impl<K, V> fmt::Debug for StoreConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("name", &self.name)
            .field("max_capacity", &self.max_capacity)
            .field("initial_capacity", &self.initial_capacity)
            .field("num_segments", &self.num_segments)
            .field("eviction", &self.eviction)
            .finish_non_exhaustive()
    }
}

/// Builds an [`OnHeapStore`][store-struct] with various configuration knobs.
///
/// [store-struct]: ./struct.OnHeapStore.html
///
/// # Examples
///
/// ```rust
/// use heapcache::StoreBuilder;
///
/// use std::time::Duration;
///
/// let store = StoreBuilder::new(10_000) // Max 10,000 units of weight
///     // The weight of an entry is the length of its value.
///     .weigher(|_key: &u32, value: &String| value.len() as u32)
///     // Never evict the entry of key 0.
///     .eviction_veto(|key: &u32, _value: &String| *key == 0)
///     // Time to live (TTL): 30 minutes
///     .time_to_live(Duration::from_secs(30 * 60))
///     // Time to idle (TTI):  5 minutes
///     .time_to_idle(Duration::from_secs(5 * 60))
///     // Create the store.
///     .build();
///
/// store.put(0, "zero".to_string());
/// assert_eq!(store.get(&0).unwrap(), Some("zero".to_string()));
/// ```
///
pub struct StoreBuilder<K, V> {
    config: StoreConfig<K, V>,
    veto: Option<Arc<dyn EvictionVeto<K, V>>>,
    prioritizer: Option<Arc<dyn EvictionPrioritizer<K, V>>>,
    expiry: Option<Arc<dyn Expiry<K, V>>>,
    time_to_live: Option<Duration>,
    time_to_idle: Option<Duration>,
    time_source: Option<SharedTimeSource>,
    key_copier: Option<SharedCopier<K>>,
    value_copier: Option<SharedCopier<V>>,
}

impl<K, V> Default for StoreBuilder<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            config: StoreConfig::default(),
            veto: None,
            prioritizer: None,
            expiry: None,
            time_to_live: None,
            time_to_idle: None,
            time_source: None,
            key_copier: None,
            value_copier: None,
        }
    }
}

impl<K, V> StoreBuilder<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Constructs a new `StoreBuilder` that will make a store holding up to
    /// `max_capacity` units of weight.
    pub fn new(max_capacity: u64) -> Self {
        let mut builder = Self::default();
        builder.config.max_capacity = Some(max_capacity);
        builder
    }

    /// Constructs a new `StoreBuilder` that will make a store without a
    /// capacity bound. Entries then only leave by removal or expiration.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Builds an `OnHeapStore<K, V>`.
    pub fn build(self) -> OnHeapStore<K, V, RandomState> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds an `OnHeapStore<K, V, S>`, with the given `hasher`.
    pub fn build_with_hasher<S>(self, hasher: S) -> OnHeapStore<K, V, S>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        let expiry = self.expiry.or_else(|| {
            if self.time_to_live.is_some() || self.time_to_idle.is_some() {
                let policy = ExpiryPolicy::new(self.time_to_live, self.time_to_idle);
                Some(Arc::new(policy) as Arc<dyn Expiry<K, V>>)
            } else {
                None
            }
        });
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemTimeSource::new()));
        let value_copier = self
            .value_copier
            .unwrap_or_else(|| Arc::new(IdentityCopier::default()));

        OnHeapStore::from_parts(
            self.config,
            self.veto,
            self.prioritizer,
            expiry,
            time_source,
            self.key_copier,
            value_copier,
            hasher,
        )
    }

    /// Sets the name of the store. It is prefixed to the store's log messages.
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = Some(name.to_string());
        self
    }

    /// Sets the initial capacity (number of entries) of the store.
    pub fn initial_capacity(mut self, number_of_entries: usize) -> Self {
        self.config.initial_capacity = Some(number_of_entries);
        self
    }

    /// Sets the number of segments of the store's entry map.
    ///
    /// # Panics
    ///
    /// Panics if `num_segments` is zero.
    pub fn segments(mut self, num_segments: usize) -> Self {
        assert!(num_segments != 0);
        self.config.num_segments = num_segments;
        self
    }

    /// Sets the weigher closure of the store.
    ///
    /// The closure should take `&K` and `&V` as the arguments and returns a
    /// `u32` representing the relative size of the entry. A weight of zero is
    /// counted as one. The closure is called while the segment of the key is
    /// locked, so it must not call back into the store.
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
        self.config.weigher = Some(Arc::new(weigher));
        self
    }

    /// Sets the eviction veto. A vetoed entry is never chosen as an eviction
    /// victim, but an expired one is always removed.
    pub fn eviction_veto(mut self, veto: impl EvictionVeto<K, V> + 'static) -> Self {
        self.veto = Some(Arc::new(veto));
        self
    }

    /// Sets the eviction prioritizer. Among the sampled candidates, the one
    /// ordered first (the minimum) is evicted.
    pub fn eviction_prioritizer(
        mut self,
        prioritizer: impl EvictionPrioritizer<K, V> + 'static,
    ) -> Self {
        self.prioritizer = Some(Arc::new(prioritizer));
        self
    }

    /// Sets the sample size and the number of attempts of the eviction.
    pub fn eviction_config(mut self, config: EvictionConfig) -> Self {
        self.config.eviction = config;
        self
    }

    /// Sets a custom expiry. It takes precedence over `time_to_live` and
    /// `time_to_idle`.
    ///
    /// Its methods are called while the segment of the key is locked, so they
    /// must not call back into the store.
    pub fn expiry(mut self, expiry: impl Expiry<K, V> + 'static) -> Self {
        self.expiry = Some(Arc::new(expiry));
        self
    }

    /// Sets the time to live of the store.
    ///
    /// An entry will expire after the specified duration past from `put`.
    pub fn time_to_live(mut self, duration: Duration) -> Self {
        self.time_to_live = Some(duration);
        self
    }

    /// Sets the time to idle of the store.
    ///
    /// An entry will expire after the specified duration past from `get` or
    /// `put`.
    pub fn time_to_idle(mut self, duration: Duration) -> Self {
        self.time_to_idle = Some(duration);
        self
    }

    /// Sets the source of time used to stamp and expire entries.
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Sets the copier applied to keys when they are stored. Without one,
    /// keys are moved into the store as they are.
    pub fn key_copier(mut self, copier: impl Copier<K> + 'static) -> Self {
        self.key_copier = Some(Arc::new(copier));
        self
    }

    /// Sets the copier applied to values when they are stored and returned.
    /// Defaults to [`IdentityCopier`][identity].
    ///
    /// [identity]: ../copier/struct.IdentityCopier.html
    pub fn value_copier(mut self, copier: impl Copier<V> + 'static) -> Self {
        self.value_copier = Some(Arc::new(copier));
        self
    }

    /// Sets the eviction listener closure of the store. It is called with the
    /// key, the value and the cause of every entry that leaves the store,
    /// after the store's locks are released.
    ///
    /// A listener that panics is disabled.
    pub fn eviction_listener(
        mut self,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.config.eviction_listener = Some(Arc::new(listener));
        self
    }
}
