//! Provides [`PartitionedExecutor`], which runs the asynchronous side-effects
//! of a cache (write-behind, event dispatch) on a shared thread pool.
//!
//! Every task is submitted with a key. Tasks whose keys hash to the same
//! partition run one at a time, in submission order. Tasks of different
//! partitions run in parallel, as far as the pool allows.

mod task;

pub use task::{PendingTask, TaskHandle};

use std::{
    collections::{hash_map::RandomState, VecDeque},
    convert::Infallible,
    error::Error,
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant as StdInstant},
};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::{
    common::concurrent::{
        interrupt::{self, Interrupter},
        thread_pool::{Job, PoolName, TaskPool, ThreadPool, ThreadPoolRegistry},
    },
    BuildError, Interrupted, RejectedExecution,
};
use task::Work;

/// The lifecycle of a [`PartitionedExecutor`].
///
/// It only moves forward: `Running` → `ShuttingDown` → `Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorState {
    /// Accepting and running tasks.
    Running,
    /// A shutdown was requested. New tasks are rejected; tasks already
    /// accepted still run, unless the shutdown was immediate.
    ShuttingDown,
    /// Shut down, with no task running or queued.
    Terminated,
}

/// An executor that multiplexes per-key FIFO partitions onto a shared pool of
/// threads.
///
/// # Examples
///
/// ```rust
/// use heapcache::{pool::ThreadPool, PartitionedExecutor};
///
/// use std::{sync::Arc, time::Duration};
///
/// let pool = Arc::new(ThreadPool::new("write-behind-{}", 4));
/// let executor = PartitionedExecutor::new(16, pool).expect("non-zero partitions");
///
/// // Both tasks run on the partition of "user:42", the second after the first.
/// let first = executor.submit("user:42", || "saved v1").unwrap();
/// let second = executor.submit("user:42", || "saved v2").unwrap();
/// assert_eq!(first.join().unwrap(), "saved v1");
/// assert_eq!(second.join().unwrap(), "saved v2");
///
/// executor.shutdown();
/// assert!(executor.await_termination(Duration::from_secs(5)));
/// assert!(executor.submit("user:42", || ()).is_err());
/// ```
///
/// # Shutdown
///
/// [`shutdown`](#method.shutdown) stops accepting tasks and lets the
/// accepted ones run. [`shutdown_now`](#method.shutdown_now) also takes the
/// tasks that have not started out of the queues and returns them, and
/// interrupts the running ones: a running task can poll
/// [`interrupt::is_interrupted`][is-interrupted], and its blocked waits inside
/// this crate fail with an interruption error. Dropping the executor is a
/// graceful `shutdown`.
///
/// [is-interrupted]: ../interrupt/fn.is_interrupted.html
pub struct PartitionedExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for PartitionedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedExecutor")
            .field("partition_count", &self.partition_count())
            .field("state", &self.state())
            .field("queued_len", &self.queued_len())
            .finish()
    }
}

impl Drop for PartitionedExecutor {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl PartitionedExecutor {
    /// Creates an executor with `partition_count` partitions running on
    /// `pool`.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::ZeroPartitions` if `partition_count` is zero.
    pub fn new(partition_count: usize, pool: Arc<dyn TaskPool>) -> Result<Self, BuildError> {
        Self::with_pool(partition_count, Pool::Custom(pool))
    }

    /// Creates an executor running on the process-wide pool registered under
    /// `name`. The pool is created on first use and has one thread per CPU.
    /// It goes away once no executor uses it anymore.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::ZeroPartitions` if `partition_count` is zero.
    pub fn with_shared_pool(partition_count: usize, name: PoolName) -> Result<Self, BuildError> {
        if partition_count == 0 {
            return Err(BuildError::ZeroPartitions);
        }
        let pool = ThreadPoolRegistry::acquire_pool(name);
        Self::with_pool(partition_count, Pool::Shared(pool))
    }

    fn with_pool(partition_count: usize, pool: Pool) -> Result<Self, BuildError> {
        if partition_count == 0 {
            return Err(BuildError::ZeroPartitions);
        }
        let partitions = (0..partition_count)
            .map(|_| CachePadded::new(Mutex::new(Partition::default())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            inner: Arc::new(Inner {
                partitions,
                pool,
                build_hasher: RandomState::new(),
                state: RwLock::new(ExecutorState::Running),
                active_partitions: AtomicUsize::default(),
                terminated: Mutex::new(false),
                termination: Condvar::new(),
            }),
        })
    }

    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Returns the index of the partition the tasks of `key` run on.
    pub fn partition_of<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        let mut hasher = self.inner.build_hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count() as u64) as usize
    }

    /// Submits `task` to the partition of `key`. A panic of the task is
    /// reported to its handle as `TaskError::Panicked`.
    ///
    /// # Errors
    ///
    /// Returns `RejectedExecution` if a shutdown has been requested.
    pub fn submit<Q, T>(
        &self,
        key: &Q,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<TaskHandle<T>, RejectedExecution>
    where
        Q: Hash + ?Sized,
        T: Send + 'static,
    {
        self.try_submit(key, move || Ok::<_, Infallible>(task()))
    }

    /// Submits a fallible `task` to the partition of `key`. An error returned
    /// by the task is reported to its handle as `TaskError::Failed`; the
    /// following tasks of the partition still run.
    ///
    /// # Errors
    ///
    /// Returns `RejectedExecution` if a shutdown has been requested.
    pub fn try_submit<Q, T, E>(
        &self,
        key: &Q,
        task: impl FnOnce() -> Result<T, E> + Send + 'static,
    ) -> Result<TaskHandle<T>, RejectedExecution>
    where
        Q: Hash + ?Sized,
        T: Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        let partition = self.partition_of(key);
        let (work, handle) = task::new_task(task);
        self.inner.enqueue(partition, work)?;
        Ok(handle)
    }

    /// Stops accepting tasks. Tasks already accepted still run; the executor
    /// terminates once they are all done. Does not wait for that.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Stops accepting tasks, removes the tasks that have not started from
    /// the queues, and interrupts the running ones.
    ///
    /// Returns the removed tasks, ordered by partition and then by
    /// submission. Dropping them cancels their handles.
    pub fn shutdown_now(&self) -> Vec<PendingTask> {
        self.inner.shutdown();

        let mut pending = Vec::new();
        for (index, partition) in self.inner.partitions.iter().enumerate() {
            let mut partition = partition.lock();
            pending.extend(
                partition
                    .queue
                    .drain(..)
                    .map(|work| PendingTask::new(index, work)),
            );
            if let Some(interrupter) = &partition.running {
                interrupter.interrupt();
            }
        }

        #[cfg(feature = "logging")]
        log::debug!(
            "Immediate shutdown removed {} pending tasks from the queues",
            pending.len()
        );
        pending
    }

    /// Blocks until the executor terminates or `timeout` elapses. Returns
    /// `true` if it terminated.
    ///
    /// Also returns `false`, early, if the calling thread is interrupted.
    /// Never call it from a task of the same executor; the executor cannot
    /// terminate while that task waits.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.await_termination_interruptibly(timeout)
            .unwrap_or(false)
    }

    /// Like [`await_termination`](#method.await_termination), but reports an
    /// interruption of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the calling thread runs in an interrupt scope
    /// that gets tripped while waiting.
    pub fn await_termination_interruptibly(&self, timeout: Duration) -> Result<bool, Interrupted> {
        let deadline = StdInstant::now().checked_add(timeout);
        let mut terminated = self.inner.terminated.lock();
        interrupt::wait_until(
            &self.inner.termination,
            &mut terminated,
            |terminated| *terminated,
            deadline,
        )?;
        Ok(*terminated)
    }

    /// Returns `true` once a shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.state() != ExecutorState::Running
    }

    /// Returns `true` once the executor is shut down and idle.
    pub fn is_terminated(&self) -> bool {
        self.state() == ExecutorState::Terminated
    }

    pub fn state(&self) -> ExecutorState {
        *self.inner.state.read()
    }

    /// Returns the number of tasks waiting in the queues. Running tasks are
    /// not counted.
    pub fn queued_len(&self) -> usize {
        self.inner
            .partitions
            .iter()
            .map(|partition| partition.lock().queue.len())
            .sum()
    }
}

enum Pool {
    /// A pool from the registry. Released when the executor goes away.
    Shared(Arc<ThreadPool>),
    Custom(Arc<dyn TaskPool>),
}

impl Pool {
    fn execute(&self, job: Job) {
        match self {
            Pool::Shared(pool) => pool.execute(job),
            Pool::Custom(pool) => pool.execute(job),
        }
    }
}

#[derive(Default)]
struct Partition {
    queue: VecDeque<Work>,
    /// `true` while the partition has a job in the pool, or a task running.
    scheduled: bool,
    /// The interrupter of the running task.
    running: Option<Interrupter>,
}

struct Inner {
    partitions: Box<[CachePadded<Mutex<Partition>>]>,
    pool: Pool,
    build_hasher: RandomState,
    state: RwLock<ExecutorState>,
    /// The number of scheduled partitions.
    active_partitions: AtomicUsize,
    terminated: Mutex<bool>,
    termination: Condvar,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Pool::Shared(pool) = &self.pool {
            ThreadPoolRegistry::release_pool(pool);
        }
    }
}

impl Inner {
    fn enqueue(self: &Arc<Self>, index: usize, work: Work) -> Result<(), RejectedExecution> {
        let needs_scheduling = {
            // Held until the partition is counted as active, so that a shutdown
            // never terminates the executor with an accepted task. Released
            // before scheduling, as the pool may run the job on this thread.
            let state = self.state.read();
            if *state != ExecutorState::Running {
                return Err(RejectedExecution);
            }

            let needs_scheduling = {
                let mut partition = self.partitions[index].lock();
                partition.queue.push_back(work);
                !std::mem::replace(&mut partition.scheduled, true)
            };
            if needs_scheduling {
                self.active_partitions.fetch_add(1, Ordering::AcqRel);
            }
            needs_scheduling
        };
        if needs_scheduling {
            self.schedule(index);
        }
        Ok(())
    }

    fn schedule(self: &Arc<Self>, index: usize) {
        let inner = Arc::clone(self);
        self.pool.execute(Box::new(move || inner.run_next(index)));
    }

    /// Runs the task at the head of the partition's queue, then hands the
    /// partition back to the pool if more tasks are waiting.
    fn run_next(self: &Arc<Self>, index: usize) {
        let partition = &self.partitions[index];

        let next = {
            let mut partition = partition.lock();
            let next = partition.queue.pop_front();
            match &next {
                Some(_) => partition.running = Some(Interrupter::new()),
                // Emptied by an immediate shutdown.
                None => partition.scheduled = false,
            }
            next.zip(partition.running.clone())
        };
        let Some((work, interrupter)) = next else {
            self.partition_idle();
            return;
        };

        // Panics are caught by the task itself.
        interrupt::scope(&interrupter, work);

        let has_more = {
            let mut partition = partition.lock();
            partition.running = None;
            if partition.queue.is_empty() {
                partition.scheduled = false;
                false
            } else {
                true
            }
        };
        if has_more {
            self.schedule(index);
        } else {
            self.partition_idle();
        }
    }

    fn partition_idle(&self) {
        if self.active_partitions.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_terminate();
        }
    }

    fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state != ExecutorState::Running {
                return;
            }
            *state = ExecutorState::ShuttingDown;
        }
        #[cfg(feature = "logging")]
        log::debug!("Shutting down a partitioned executor");
        self.try_terminate();
    }

    fn try_terminate(&self) {
        if *self.state.read() != ExecutorState::ShuttingDown
            || self.active_partitions.load(Ordering::Acquire) != 0
        {
            return;
        }
        {
            let mut state = self.state.write();
            if *state != ExecutorState::ShuttingDown
                || self.active_partitions.load(Ordering::Acquire) != 0
            {
                return;
            }
            *state = ExecutorState::Terminated;
        }
        *self.terminated.lock() = true;
        self.termination.notify_all();

        #[cfg(feature = "logging")]
        log::debug!("A partitioned executor terminated");
    }
}
