#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
// Temporary disable this lint as the MSRV (1.65) require an older lint name:
// #![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! `heapcache` is an in-process caching core. It provides two building blocks:
//!
//! - [`store::OnHeapStore`]: a bounded, concurrent key/value store.
//!     - Concurrent misses on the same key are serialized behind a single
//!       placeholder (a _fault_), so a mapping function runs at most once per
//!       key at a time.
//!     - Capacity is enforced synchronously after every operation that may
//!       grow the store, by evicting the lowest ranked entry out of a small
//!       random sample of live entries. An eviction veto can exempt entries
//!       and an eviction prioritizer can rank them.
//!     - Entries can expire lazily through an [`Expiry`][expiry] policy driven
//!       by an injectable [`TimeSource`][time-source].
//! - [`executor::PartitionedExecutor`]: runs asynchronous cache side-effects
//!   (write-behind, event dispatch). Tasks sharing a partition key run one at
//!   a time in submission order, while different partitions run in parallel
//!   on a shared thread pool. It supports graceful and immediate shutdown.
//!
//! [expiry]: ./policy/trait.Expiry.html
//! [time-source]: ./time/trait.TimeSource.html
//!
//! # Example
//!
//! ```rust
//! use heapcache::store::StoreBuilder;
//!
//! let store = StoreBuilder::new(2).build();
//!
//! store.put("a", 1);
//! let v = store
//!     .compute_if_absent("b", |_key| Some(2))
//!     .expect("not interrupted");
//! assert_eq!(v, Some(2));
//!
//! // Inserting a third entry exceeds the capacity and evicts one entry.
//! store.put("c", 3);
//! assert_eq!(store.entry_count(), 2);
//! ```
//!
//! # Minimum Supported Rust Versions
//!
//! This crate's minimum supported Rust version (MSRV) is 1.65.

pub(crate) mod common;

pub mod copier;
pub mod executor;
pub mod notification;
pub mod policy;
pub mod store;

pub use common::error::{
    BuildError, Interrupted, RejectedExecution, SharedError, StoreError, TaskError,
};

/// Cooperative interruption of running tasks and blocked waits.
pub mod interrupt {
    pub use crate::common::concurrent::interrupt::{is_interrupted, scope, Interrupter};
}

/// Time sources used to evaluate entry expiration.
pub mod time {
    pub use crate::common::time::{Instant, ManualTimeSource, SystemTimeSource, TimeSource};
}

/// The shared thread pool partitions are multiplexed onto.
pub mod pool {
    pub use crate::common::concurrent::thread_pool::{Job, PoolName, TaskPool, ThreadPool};
}

pub use executor::{ExecutorState, PartitionedExecutor};
pub use store::{OnHeapStore, StoreBuilder};

#[cfg(test)]
mod tests {
    #[test]
    fn store_and_executor_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<crate::OnHeapStore<String, String>>();
        assert_send_sync::<crate::PartitionedExecutor>();
    }
}
