//! Asynchronous operations and their timeouts.
//!
//! An [`AsyncOperation`] represents work that finishes outside the calling
//! stack: sourcing a managed object, coordinating it, or a governance
//! transition. Execution suspends on pending operations and is resumed by the
//! callbacks registered through [`AsyncOperation::when_complete`].
//!
//! The [`AsyncMonitor`] fails operations that outlive their timeout.

use core::time::Duration;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::escalation::{Escalation, ExecutionError};

type Waiter = Box<dyn FnOnce(&Result<(), Escalation>) + Send>;

enum OperationState {
    Pending(Vec<Waiter>),
    Done(Result<(), Escalation>),
}

struct OperationInner {
    started: Instant,
    state: Mutex<OperationState>,
}

/// Completion handle shared between whoever performs the work and whoever
/// waits on it.
///
/// An operation finishes exactly once. Later calls to [`complete`] or
/// [`fail`] are ignored and report `false`.
///
/// [`complete`]: AsyncOperation::complete
/// [`fail`]: AsyncOperation::fail
#[derive(Clone)]
pub struct AsyncOperation {
    inner: Arc<OperationInner>,
}

impl Default for AsyncOperation {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncOperation {
    /// Creates a pending operation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OperationInner {
                started: Instant::now(),
                state: Mutex::new(OperationState::Pending(Vec::new())),
            }),
        }
    }

    /// Creates an operation that has already completed successfully.
    #[must_use]
    pub fn completed() -> Self {
        let operation = Self::new();
        operation.complete();
        operation
    }

    /// Marks the operation successful. Returns `false` if it had already finished.
    pub fn complete(&self) -> bool {
        self.finish(Ok(()))
    }

    /// Marks the operation failed. Returns `false` if it had already finished.
    pub fn fail(&self, cause: impl Into<Escalation>) -> bool {
        self.finish(Err(cause.into()))
    }

    fn finish(&self, outcome: Result<(), Escalation>) -> bool {
        let waiters = {
            let mut state = self.inner.state.lock();
            if matches!(*state, OperationState::Done(_)) {
                return false;
            }
            match core::mem::replace(&mut *state, OperationState::Done(outcome.clone())) {
                OperationState::Pending(waiters) => waiters,
                OperationState::Done(_) => Vec::new(),
            }
        };

        for waiter in waiters {
            waiter(&outcome);
        }
        true
    }

    /// Registers a callback run once the operation finishes.
    ///
    /// If it already has, the callback runs immediately on the calling thread.
    pub fn when_complete(&self, callback: impl FnOnce(&Result<(), Escalation>) + Send + 'static) {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                OperationState::Pending(waiters) => {
                    waiters.push(Box::new(callback));
                    return;
                }
                OperationState::Done(outcome) => outcome.clone(),
            }
        };
        callback(&outcome);
    }

    /// Returns the outcome, or `None` while pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<(), Escalation>> {
        match &*self.inner.state.lock() {
            OperationState::Pending(_) => None,
            OperationState::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// Returns `true` once the operation has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(*self.inner.state.lock(), OperationState::Done(_))
    }

    /// Time since the operation was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Returns `true` if both handles refer to the same operation.
    #[must_use]
    pub fn ptr_eq(&self, other: &AsyncOperation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl core::fmt::Debug for AsyncOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("complete", &self.is_complete())
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

/// Result of a step that may finish later.
#[derive(Debug, Clone)]
pub enum Progress {
    /// The step finished.
    Complete,
    /// The step finishes when the operation does.
    Pending(AsyncOperation),
}

impl Progress {
    /// Returns `true` if the step finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AsyncMonitor
// ─────────────────────────────────────────────────────────────────────────────

struct Watched {
    operation: Weak<OperationInner>,
    deadline: Instant,
    timeout: Duration,
}

/// Registry of pending operations that fails those exceeding their timeout.
///
/// Operations are held weakly; dropping every handle to an operation removes
/// it from the registry on the next sweep.
#[derive(Default)]
pub struct AsyncMonitor {
    watched: Mutex<Vec<Watched>>,
}

impl AsyncMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `operation`, failing it if still pending after `timeout`.
    pub fn watch(&self, operation: &AsyncOperation, timeout: Duration) {
        if operation.is_complete() {
            return;
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            tracing::trace!(?timeout, "timeout beyond the clock's range, operation not watched");
            return;
        };
        self.watched.lock().push(Watched {
            operation: Arc::downgrade(&operation.inner),
            deadline,
            timeout,
        });
    }

    /// Fails every expired operation. Returns how many were failed.
    pub fn check(&self) -> usize {
        self.check_at(Instant::now())
    }

    /// Like [`check`](Self::check) but against an explicit instant.
    pub fn check_at(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.watched.lock().retain(|watched| {
            let Some(inner) = watched.operation.upgrade() else {
                return false;
            };
            let operation = AsyncOperation { inner };
            if operation.is_complete() {
                return false;
            }
            if now >= watched.deadline {
                expired.push((operation, watched.timeout));
                return false;
            }
            true
        });

        // Failing runs waiters, so it happens outside the registry lock.
        let mut failed = 0;
        for (operation, timeout) in expired {
            tracing::warn!(?timeout, "asynchronous operation timed out");
            if operation.fail(ExecutionError::AsyncOperationTimedOut { timeout }) {
                failed += 1;
            }
        }
        failed
    }

    /// Number of operations currently watched.
    #[must_use]
    pub fn watched(&self) -> usize {
        self.watched.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn operation_finishes_once() {
        let operation = AsyncOperation::new();
        assert!(operation.outcome().is_none());
        assert!(operation.complete());
        assert!(!operation.fail(Escalation::msg("late")));
        assert!(matches!(operation.outcome(), Some(Ok(()))));
    }

    #[test]
    fn waiters_run_on_completion() {
        let operation = AsyncOperation::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        operation.when_complete(move |outcome| {
            assert!(outcome.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        operation.fail(Escalation::msg("broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiters_registered_late_run_immediately() {
        let operation = AsyncOperation::completed();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        operation.when_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn monitor_fails_expired_operations() {
        let monitor = AsyncMonitor::new();
        let slow = AsyncOperation::new();
        let patient = AsyncOperation::new();
        monitor.watch(&slow, Duration::from_millis(5));
        monitor.watch(&patient, Duration::from_secs(60));

        let failed = monitor.check_at(Instant::now() + Duration::from_millis(10));

        assert_eq!(failed, 1);
        let cause = slow.outcome().unwrap().unwrap_err();
        assert!(cause.is::<ExecutionError>());
        assert!(patient.outcome().is_none());
        assert_eq!(monitor.watched(), 1);
    }

    #[test]
    fn monitor_forgets_completed_and_dropped_operations() {
        let monitor = AsyncMonitor::new();
        let done = AsyncOperation::new();
        monitor.watch(&done, Duration::from_millis(1));
        done.complete();
        {
            let dropped = AsyncOperation::new();
            monitor.watch(&dropped, Duration::from_millis(1));
        }

        assert_eq!(monitor.check_at(Instant::now() + Duration::from_secs(1)), 0);
        assert_eq!(monitor.watched(), 0);
    }
    #[test]
    fn unbounded_timeout_is_not_watched() {
        let monitor = AsyncMonitor::new();
        let operation = AsyncOperation::new();
        monitor.watch(&operation, Duration::MAX);

        assert_eq!(monitor.watched(), 0);
        assert_eq!(monitor.check(), 0);
        assert!(operation.outcome().is_none());
    }
}
