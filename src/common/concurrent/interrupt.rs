//! Cooperative interruption.
//!
//! Rust threads cannot be interrupted from the outside. Instead, every task
//! run by a [`PartitionedExecutor`][executor] runs inside an interrupt _scope_
//! bound to an [`Interrupter`]. Immediate shutdown trips the interrupters of
//! the running tasks. A task notices it either by polling
//! [`is_interrupted`], or by being woken up from a blocked wait inside this
//! crate (waiting on another thread's computation for the same key, or
//! waiting for an executor to terminate), which then fails with
//! [`Interrupted`][interrupted].
//!
//! A task that ignores the signal simply runs to completion.
//!
//! [executor]: ../executor/struct.PartitionedExecutor.html
//! [interrupted]: ../struct.Interrupted.html

use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant as StdInstant},
};

use parking_lot::{Condvar, MutexGuard};

use super::constants::INTERRUPT_CHECK_INTERVAL;
use crate::common::error::Interrupted;

thread_local! {
    static CURRENT: RefCell<Option<Interrupter>> = RefCell::new(None);
}

/// A shareable interrupt flag. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct Interrupter {
    flag: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests interruption of whatever runs in a scope bound to this
    /// interrupter.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Returns `true` if the current thread runs inside an interrupt scope whose
/// interrupter has been tripped.
pub fn is_interrupted() -> bool {
    CURRENT.with(|cur| {
        cur.borrow()
            .as_ref()
            .map_or(false, Interrupter::is_interrupted)
    })
}

/// Runs `f` with `interrupter` bound to the current thread. Blocked waits
/// inside `f` fail with `Interrupted` once the interrupter is tripped.
///
/// Scopes nest. The previous binding is restored when `f` returns or panics.
pub fn scope<R>(interrupter: &Interrupter, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Interrupter>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT.with(|cur| *cur.borrow_mut() = prev);
        }
    }

    let prev = CURRENT.with(|cur| cur.borrow_mut().replace(interrupter.clone()));
    let _restore = Restore(prev);
    f()
}

pub(crate) fn current() -> Option<Interrupter> {
    CURRENT.with(|cur| cur.borrow().clone())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Done,
    TimedOut,
}

/// Blocks on `condvar` until `done` returns `true`, the `deadline` passes, or
/// the current thread's interrupter is tripped.
///
/// Inside an interrupt scope the wait is sliced so the flag is re-checked
/// every `INTERRUPT_CHECK_INTERVAL`. Outside of one it parks until notified.
pub(crate) fn wait_until<T>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    mut done: impl FnMut(&mut T) -> bool,
    deadline: Option<StdInstant>,
) -> Result<WaitOutcome, Interrupted> {
    let interrupter = current();

    loop {
        if done(&mut **guard) {
            return Ok(WaitOutcome::Done);
        }
        if interrupter.as_ref().map_or(false, Interrupter::is_interrupted) {
            return Err(Interrupted);
        }

        let mut slice = match deadline {
            Some(deadline) => {
                let now = StdInstant::now();
                if now >= deadline {
                    return Ok(WaitOutcome::TimedOut);
                }
                deadline - now
            }
            None => Duration::MAX,
        };
        if interrupter.is_some() {
            slice = slice.min(INTERRUPT_CHECK_INTERVAL);
        }

        if slice == Duration::MAX {
            condvar.wait(guard);
        } else {
            condvar.wait_for(guard, slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_interrupted, scope, wait_until, Interrupter, WaitOutcome};
    use parking_lot::{Condvar, Mutex};
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn scopes_nest_and_restore() {
        assert!(!is_interrupted());

        let outer = Interrupter::new();
        let inner = Interrupter::new();
        inner.interrupt();

        scope(&outer, || {
            assert!(!is_interrupted());
            scope(&inner, || assert!(is_interrupted()));
            assert!(!is_interrupted());
            outer.interrupt();
            assert!(is_interrupted());
        });

        assert!(!is_interrupted());
    }

    #[test]
    fn scope_is_restored_after_panic() {
        let interrupter = Interrupter::new();
        interrupter.interrupt();
        let result = std::panic::catch_unwind(|| scope(&interrupter, || panic!("boom")));
        assert!(result.is_err());
        assert!(!is_interrupted());
    }

    #[test]
    fn wait_times_out() {
        let lock = Mutex::new(false);
        let cv = Condvar::new();
        let mut guard = lock.lock();
        let deadline = Instant::now() + Duration::from_millis(20);
        let outcome = wait_until(&cv, &mut guard, |ready| *ready, Some(deadline));
        assert_eq!(outcome, Ok(WaitOutcome::TimedOut));
    }

    #[test]
    fn wait_is_interrupted() {
        let interrupter = Interrupter::new();
        let lock = Mutex::new(false);
        let cv = Condvar::new();

        let remote = interrupter.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.interrupt();
        });

        let outcome = scope(&interrupter, || {
            let mut guard = lock.lock();
            wait_until(&cv, &mut guard, |ready| *ready, None)
        });
        assert!(outcome.is_err());
        handle.join().expect("interrupting thread panicked");
    }

    #[test]
    fn wait_wakes_on_notify() {
        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let remote = Arc::clone(&pair);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *remote.0.lock() = true;
            remote.1.notify_all();
        });

        let mut guard = pair.0.lock();
        let outcome = wait_until(&pair.1, &mut guard, |ready| *ready, None);
        assert_eq!(outcome, Ok(WaitOutcome::Done));
        drop(guard);
        handle.join().expect("notifying thread panicked");
    }
}
