use std::{error::Error, fmt, sync::Arc};

/// A type-erased error raised by a user supplied mapping function or task.
///
/// It is reference counted so every caller that observes the same failure
/// gets the same error object.
pub type SharedError = Arc<dyn Error + Send + Sync + 'static>;

/// The error type of the [`OnHeapStore`][store] operations.
///
/// [store]: ./store/struct.OnHeapStore.html
#[derive(thiserror::Error, Debug, Clone)]
pub enum StoreError {
    /// The mapping or remapping function returned an error. The entry was left
    /// as it was before the call.
    ///
    /// Every caller that was waiting on the same computation observes the same
    /// error object.
    #[error("the mapping function failed: {0}")]
    ComputationFailure(SharedError),
    /// The calling thread was interrupted while it was waiting for another
    /// thread's computation on the same key.
    #[error("interrupted while waiting for a pending computation")]
    Interrupted,
    /// The computation for the key kept panicking on other threads, so this
    /// call gave up waiting for it.
    #[error(
        "gave up after {0} attempts to read a value whose computation kept panicking \
    on other threads"
    )]
    Panicked(usize),
}

impl StoreError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// Two failures are equal when they carry the very same error object.
impl PartialEq for StoreError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ComputationFailure(e1), Self::ComputationFailure(e2)) => Arc::ptr_eq(e1, e2),
            (Self::Interrupted, Self::Interrupted) => true,
            (Self::Panicked(n1), Self::Panicked(n2)) => n1 == n2,
            _ => false,
        }
    }
}

impl From<Interrupted> for StoreError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

/// The calling thread was interrupted while it was blocked.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the blocked thread was interrupted")]
pub struct Interrupted;

/// A task was submitted to a [`PartitionedExecutor`][executor] after its shutdown
/// has been requested.
///
/// [executor]: ./executor/struct.PartitionedExecutor.html
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the executor has been shut down and no longer accepts tasks")]
pub struct RejectedExecution;

/// The reason a task submitted to a [`PartitionedExecutor`][executor] did not
/// produce a value.
///
/// [executor]: ./executor/struct.PartitionedExecutor.html
#[derive(thiserror::Error, Clone)]
pub enum TaskError {
    /// The task returned an error.
    #[error("the task failed: {0}")]
    Failed(SharedError),
    /// The task panicked. Holds the panic message when it was a string.
    #[error("the task panicked: {0}")]
    Panicked(String),
    /// The task was removed from its queue by an immediate shutdown before it
    /// started, and dropped without being run.
    #[error("the task was cancelled before it started")]
    Cancelled,
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => f.debug_tuple("Failed").field(&e.to_string()).finish(),
            Self::Panicked(m) => f.debug_tuple("Panicked").field(m).finish(),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors that can occur when building a store or an executor.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// The eviction sample size was zero. At least one candidate must be
    /// drawn per eviction round.
    #[error("the eviction sample size cannot be zero")]
    ZeroSampleSize,
    /// The maximum number of eviction attempts was zero.
    #[error("the maximum number of eviction attempts cannot be zero")]
    ZeroEvictionAttempts,
    /// The entry map was configured with zero segments.
    #[error("the segment count cannot be zero")]
    ZeroSegments,
    /// The executor was configured with zero partitions.
    #[error("the partition count cannot be zero")]
    ZeroPartitions,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send + 'static)) -> Option<String> {
    // Try to downcast the payload into &str or String.
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

#[cfg(test)]
mod tests {
    use super::{panic_message, StoreError, TaskError};
    use std::sync::Arc;

    #[derive(thiserror::Error, Debug)]
    #[error("disk is on fire")]
    struct Fire;

    #[test]
    fn errors_display_their_cause() {
        let err = StoreError::ComputationFailure(Arc::new(Fire));
        assert_eq!(err.to_string(), "the mapping function failed: disk is on fire");

        let err = TaskError::Failed(Arc::new(Fire));
        assert_eq!(err.to_string(), "the task failed: disk is on fire");
        assert!(!err.is_cancelled());
        assert!(TaskError::Cancelled.is_cancelled());
    }

    #[test]
    fn panic_payloads_are_stringified() {
        let payload = std::panic::catch_unwind(|| panic!("static str")).unwrap_err();
        assert_eq!(panic_message(&*payload).as_deref(), Some("static str"));

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(&*payload).as_deref(), Some("formatted 42"));

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(&*payload), None);
    }
}
