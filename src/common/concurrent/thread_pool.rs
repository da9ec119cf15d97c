use once_cell::sync::Lazy;
use parking_lot::RwLock;
use scheduled_thread_pool::ScheduledThreadPool;
use std::{collections::HashMap, sync::Arc};

static REGISTRY: Lazy<ThreadPoolRegistry> = Lazy::new(ThreadPoolRegistry::default);

/// A unit of work handed to a [`TaskPool`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A shared pool of worker threads.
///
/// A [`PartitionedExecutor`][executor] hands each busy partition to its pool
/// as a single job. Implement this trait to run the partitions on another
/// pool than the bundled [`ThreadPool`].
///
/// [executor]: ../executor/struct.PartitionedExecutor.html
pub trait TaskPool: Send + Sync {
    /// Runs `job` on some thread of the pool at some point in the future.
    fn execute(&self, job: Job);
}

/// The names of the process-wide pools shared by default executors.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolName {
    /// Write-behind persistence tasks.
    WriteBehind,
    /// Cache event dispatch tasks.
    EventDispatch,
}

impl PoolName {
    fn thread_name_template(&self) -> &'static str {
        match self {
            PoolName::WriteBehind => "heapcache-write-behind-{}",
            PoolName::EventDispatch => "heapcache-events-{}",
        }
    }
}

/// A fixed-size pool of named worker threads.
pub struct ThreadPool {
    name: Option<PoolName>,
    pool: ScheduledThreadPool,
    num_threads: usize,
}

impl ThreadPool {
    /// Creates a pool of `num_threads` threads, named after
    /// `thread_name_template` where `{}` is replaced by the thread index.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is zero.
    pub fn new(thread_name_template: &str, num_threads: usize) -> Self {
        assert!(num_threads > 0, "a thread pool needs at least one thread");
        Self {
            name: None,
            pool: ScheduledThreadPool::with_name(thread_name_template, num_threads),
            num_threads,
        }
    }

    fn named(name: PoolName, num_threads: usize) -> Self {
        Self {
            name: Some(name),
            ..Self::new(name.thread_name_template(), num_threads)
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl TaskPool for ThreadPool {
    fn execute(&self, job: Job) {
        self.pool.execute(job);
    }
}

pub(crate) struct ThreadPoolRegistry {
    pools: RwLock<HashMap<PoolName, Arc<ThreadPool>>>,
}

impl Default for ThreadPoolRegistry {
    fn default() -> Self {
        Self {
            pools: RwLock::new(HashMap::default()),
        }
    }
}

impl ThreadPoolRegistry {
    pub(crate) fn acquire_pool(name: PoolName) -> Arc<ThreadPool> {
        loop {
            {
                // Acquire a read lock and get the pool.
                let pools = REGISTRY.pools.read();
                if let Some(pool) = pools.get(&name) {
                    return Arc::clone(pool);
                }
            }
            {
                // Acquire the write lock, double check the pool still does not exist,
                // and insert a new pool.
                let mut pools = REGISTRY.pools.write();
                pools.entry(name).or_insert_with(|| {
                    // NOTE: On some platforms, `num_cpus::get` may return 0. In that
                    // case, use 1.
                    // https://github.com/seanmonstar/num_cpus/issues/69
                    let num_threads = num_cpus::get().max(1);
                    Arc::new(ThreadPool::named(name, num_threads))
                });
            }
        }
    }

    pub(crate) fn release_pool(pool: &Arc<ThreadPool>) {
        let Some(name) = pool.name else {
            return;
        };
        if Arc::strong_count(pool) <= 2 {
            // No other client exists; only this Arc and the registry are
            // the owners. Let's remove and drop the one in the registry.
            let mut pools = REGISTRY.pools.write();
            if let Some(pool) = pools.get(&name) {
                if Arc::strong_count(pool) <= 2 {
                    pools.remove(&name);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn enabled_pools() -> Vec<PoolName> {
        let mut names: Vec<_> = REGISTRY.pools.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::{PoolName, TaskPool, ThreadPool, ThreadPoolRegistry};
    use std::sync::{mpsc, Arc};

    #[test]
    fn pool_runs_jobs() {
        let pool = ThreadPool::new("test-pool-{}", 2);
        assert_eq!(pool.num_threads(), 2);

        let (tx, rx) = mpsc::channel();
        for i in 0..4 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).expect("receiver dropped")));
        }
        let mut got: Vec<_> = rx.iter().take(4).collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn registry_shares_and_releases_pools() {
        let a = ThreadPoolRegistry::acquire_pool(PoolName::EventDispatch);
        let b = ThreadPoolRegistry::acquire_pool(PoolName::EventDispatch);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(ThreadPoolRegistry::enabled_pools().contains(&PoolName::EventDispatch));

        ThreadPoolRegistry::release_pool(&b);
        drop(b);
        ThreadPoolRegistry::release_pool(&a);
        drop(a);
        assert!(!ThreadPoolRegistry::enabled_pools().contains(&PoolName::EventDispatch));
    }
}
