use std::{
    error::Error,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::common::error::{panic_message, TaskError};

/// A type-erased task. Running it delivers the result to its handle; dropping
/// it without running it cancels the handle.
pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// Wraps `task` so that its outcome, including a panic, is sent to the
/// returned handle.
pub(crate) fn new_task<T, E>(
    task: impl FnOnce() -> Result<T, E> + Send + 'static,
) -> (Work, TaskHandle<T>)
where
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    let work: Work = Box::new(move || {
        let result = match catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(TaskError::Failed(Arc::new(error))),
            Err(payload) => {
                let message = panic_message(&*payload)
                    .unwrap_or_else(|| "a non-string panic payload".to_string());
                #[cfg(feature = "logging")]
                log::warn!("A task panicked at '{message}'");
                Err(TaskError::Panicked(message))
            }
        };
        // The handle may have been dropped already.
        let _ = tx.send(result);
    });
    (work, TaskHandle { rx })
}

/// A handle to the result of a task submitted to a
/// [`PartitionedExecutor`][executor].
///
/// Dropping the handle does not cancel the task.
///
/// [executor]: ./struct.PartitionedExecutor.html
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, TaskError>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("is_finished", &self.is_finished())
            .finish()
    }
}

impl<T> TaskHandle<T> {
    /// Blocks until the task is over and returns its result.
    ///
    /// # Errors
    ///
    /// - `TaskError::Failed` if the task returned an error.
    /// - `TaskError::Panicked` if the task panicked.
    /// - `TaskError::Cancelled` if the task was dropped without being run,
    ///   after an immediate shutdown of its executor.
    pub fn join(self) -> Result<T, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Waits up to `timeout` for the task's result. Returns `None` if the task
    /// is not over yet.
    ///
    /// The result is handed out only once. Later calls return
    /// `Some(Err(TaskError::Cancelled))`.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }

    /// Returns `true` if the task has run and its result is waiting to be
    /// joined.
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// A task that an immediate shutdown removed from its partition's queue
/// before it started.
///
/// Run it on the current thread with [`run`](#method.run), or drop it to
/// cancel it; its [`TaskHandle`] then reports `TaskError::Cancelled`.
pub struct PendingTask {
    partition: usize,
    work: Work,
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}

impl PendingTask {
    pub(crate) fn new(partition: usize, work: Work) -> Self {
        Self { partition, work }
    }

    /// Returns the index of the partition the task was queued on.
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// Runs the task on the current thread and delivers its result to its
    /// handle.
    pub fn run(self) {
        (self.work)()
    }
}

#[cfg(test)]
mod tests {
    use super::{new_task, PendingTask};
    use crate::TaskError;
    use std::{convert::Infallible, time::Duration};

    #[derive(Debug, thiserror::Error)]
    #[error("bad input")]
    struct BadInput;

    #[test]
    fn handle_receives_the_outcome() {
        let (work, handle) = new_task(|| Ok::<_, Infallible>(42));
        assert!(!handle.is_finished());
        assert!(handle.join_timeout(Duration::from_millis(10)).is_none());
        work();
        assert!(handle.is_finished());
        assert_eq!(handle.join().expect("task failed"), 42);

        let (work, handle) = new_task(|| Err::<(), _>(BadInput));
        work();
        match handle.join() {
            Err(TaskError::Failed(e)) => assert_eq!(e.to_string(), "bad input"),
            other => panic!("unexpected result: {other:?}"),
        }

        let (work, handle) = new_task(|| -> Result<(), Infallible> { panic!("kaboom") });
        work();
        match handle.join() {
            Err(TaskError::Panicked(m)) => assert_eq!(m, "kaboom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dropped_pending_task_cancels_its_handle() {
        let (work, handle) = new_task(|| Ok::<_, Infallible>("never"));
        let pending = PendingTask::new(3, work);
        assert_eq!(pending.partition(), 3);
        drop(pending);
        assert!(handle.join().expect_err("should be cancelled").is_cancelled());

        let (work, handle) = new_task(|| Ok::<_, Infallible>("ran"));
        PendingTask::new(0, work).run();
        assert_eq!(handle.join().expect("task failed"), "ran");
    }
}
