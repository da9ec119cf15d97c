//! Provides a thread-safe, on-heap key-value store with size-bounded sampled
//! eviction, lazy expiration and single-flight computations.
//!
//! Every method of [`OnHeapStore`][store-struct] takes `&self`; clone the
//! store to share it across threads. See the [`StoreBuilder`][builder-struct]
//! for the configuration knobs.
//!
//! [store-struct]: ./struct.OnHeapStore.html
//! [builder-struct]: ./struct.StoreBuilder.html

mod builder;
mod entry_map;
mod fault;
mod on_heap;
mod stats;
mod value_holder;

pub use crate::common::Weigher;
pub use builder::{StoreBuilder, StoreConfig};
pub use on_heap::OnHeapStore;
pub use stats::StoreStats;
