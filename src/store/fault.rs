use parking_lot::{Condvar, Mutex};
use triomphe::Arc as TrioArc;

use super::value_holder::ValueHolder;
use crate::common::{
    concurrent::interrupt::{self, WaitOutcome},
    error::{Interrupted, SharedError},
};

/// How a fault was resolved.
pub(crate) enum Resolution<V> {
    /// The computation produced a value.
    Ready(TrioArc<ValueHolder<V>>),
    /// The computation produced nothing, and the slot was removed.
    Absent,
    /// The computation returned an error, and the slot was removed.
    Failed(SharedError),
    /// The computation failed while updating an existing value, and that
    /// value has been put back. Waiters should look the key up again.
    Restored,
    /// The computation was abandoned because it panicked. Waiters should look
    /// the key up again, a bounded number of times.
    Retry,
}

impl<V> Clone for Resolution<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Ready(holder) => Self::Ready(TrioArc::clone(holder)),
            Self::Absent => Self::Absent,
            Self::Failed(e) => Self::Failed(SharedError::clone(e)),
            Self::Restored => Self::Restored,
            Self::Retry => Self::Retry,
        }
    }
}

enum State<V> {
    Pending,
    Resolved(Resolution<V>),
}

/// A placeholder occupying a key's slot while a value for the key is being
/// computed.
///
/// A fault is never a live entry: it carries no value, is not counted
/// against the capacity, and is never offered to an eviction veto or
/// prioritizer. Other threads that land on it block in [`Fault::wait`] until
/// the computing thread resolves it.
pub(crate) struct Fault<V> {
    state: Mutex<State<V>>,
    resolved: Condvar,
}

impl<V> Default for Fault<V> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            resolved: Condvar::new(),
        }
    }
}

impl<V> Fault<V> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resolves the fault and wakes up every waiter. Only the first resolution
    /// counts.
    pub(crate) fn resolve(&self, resolution: Resolution<V>) {
        let mut state = self.state.lock();
        if matches!(*state, State::Pending) {
            *state = State::Resolved(resolution);
            self.resolved.notify_all();
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), State::Pending)
    }

    /// Blocks until the fault is resolved.
    ///
    /// # Errors
    ///
    /// Returns `Interrupted` if the calling thread runs in an interrupt scope
    /// that gets tripped while waiting.
    pub(crate) fn wait(&self) -> Result<Resolution<V>, Interrupted> {
        let mut state = self.state.lock();
        let outcome = interrupt::wait_until(
            &self.resolved,
            &mut state,
            |s| matches!(s, State::Resolved(_)),
            None,
        )?;
        debug_assert_eq!(outcome, WaitOutcome::Done);
        match &*state {
            State::Resolved(resolution) => Ok(resolution.clone()),
            // Unreachable; the wait only returns once resolved.
            State::Pending => Ok(Resolution::Retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Fault, Resolution};
    use crate::{
        common::time::Instant,
        interrupt::{self, Interrupter},
        store::value_holder::ValueHolder,
    };
    use std::{sync::Arc, thread, time::Duration};
    use triomphe::Arc as TrioArc;

    #[test]
    fn waiters_observe_the_first_resolution() {
        let fault = Arc::new(Fault::<&str>::new());
        assert!(fault.is_pending());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let fault = Arc::clone(&fault);
                thread::spawn(move || match fault.wait() {
                    Ok(Resolution::Ready(holder)) => *holder.value(),
                    _ => panic!("unexpected resolution"),
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        let holder = TrioArc::new(ValueHolder::new("value", Instant::ZERO, None, 1));
        fault.resolve(Resolution::Ready(holder));
        // Ignored; already resolved.
        fault.resolve(Resolution::Absent);
        assert!(!fault.is_pending());

        for w in waiters {
            assert_eq!(w.join().expect("waiter panicked"), "value");
        }
    }

    #[test]
    fn wait_is_interruptible() {
        let fault = Fault::<u32>::new();
        let interrupter = Interrupter::new();
        interrupter.interrupt();
        let result = interrupt::scope(&interrupter, || fault.wait());
        assert!(result.is_err());
        assert!(fault.is_pending());
    }
}
