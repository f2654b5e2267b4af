//! Processes: one invocation of an office function and everything it spawns.
//!
//! A process owns its process-scoped managed objects and counts the thread
//! states still running on its behalf. It completes when the last thread state
//! finishes, or fails when an escalation reaches no handler at all.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use core::time::Duration;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cadre_core::escalation::Escalation;
use cadre_core::function::FunctionMetaData;
use cadre_core::index::ManagedObjectIndex;
use cadre_core::object::ManagedObjectContainer;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::hooks::ExecutionEvent;
use crate::office::OfficeShared;

// ─────────────────────────────────────────────────────────────────────────────
// ProcessId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier of a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessId(String);

impl ProcessId {
    /// Creates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessOutcome
// ─────────────────────────────────────────────────────────────────────────────

/// How a process ended.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Every thread state finished.
    Completed,
    /// An escalation reached no handler and the process was torn down.
    Failed(Escalation),
}

impl ProcessOutcome {
    /// Returns `true` for [`ProcessOutcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The escalation that tore the process down, if any.
    #[must_use]
    pub fn escalation(&self) -> Option<&Escalation> {
        match self {
            Self::Completed => None,
            Self::Failed(escalation) => Some(escalation),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome slot shared between a process and its handles.
#[derive(Default)]
pub(crate) struct Completion {
    outcome: Mutex<Option<ProcessOutcome>>,
    condvar: Condvar,
    notify: Notify,
}

impl Completion {
    /// Stores the outcome and wakes every waiter. Only the first call counts.
    fn finish(&self, outcome: ProcessOutcome) -> bool {
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.condvar.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn outcome(&self) -> Option<ProcessOutcome> {
        self.outcome.lock().clone()
    }
}

/// Handle to observe a running process.
///
/// # Example
///
/// ```no_run
/// # use cadre_execution::office::Office;
/// # fn demo(office: &Office) {
/// let handle = office.invoke_process("checkout", None).unwrap();
/// let outcome = handle.wait();
/// assert!(outcome.is_completed());
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessHandle {
    id: ProcessId,
    completion: Arc<Completion>,
}

impl ProcessHandle {
    /// The process identifier.
    #[must_use]
    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    /// The outcome, or `None` while still running.
    #[must_use]
    pub fn outcome(&self) -> Option<ProcessOutcome> {
        self.completion.outcome()
    }

    /// Returns `true` once the process has ended.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion.outcome.lock().is_some()
    }

    /// Blocks the calling thread until the process ends.
    pub fn wait(&self) -> ProcessOutcome {
        let mut slot = self.completion.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.completion.condvar.wait(&mut slot);
        }
    }

    /// Blocks until the process ends or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ProcessOutcome> {
        let mut slot = self.completion.outcome.lock();
        if slot.is_none() {
            let _ = self
                .completion
                .condvar
                .wait_while_for(&mut slot, |slot| slot.is_none(), timeout);
        }
        slot.clone()
    }

    /// Waits asynchronously until the process ends.
    pub async fn completed(&self) -> ProcessOutcome {
        loop {
            let notified = self.completion.notify.notified();
            let mut notified = core::pin::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.completion.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProcessState
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state of one process.
pub(crate) struct ProcessState {
    pub id: ProcessId,
    pub office: Arc<OfficeShared>,
    pub invocation_handler: Option<Arc<FunctionMetaData>>,
    objects: Mutex<HashMap<usize, Arc<ManagedObjectContainer>>>,
    live_threads: AtomicUsize,
    torn_down: AtomicBool,
    completion: Arc<Completion>,
}

impl ProcessState {
    pub fn new(
        office: Arc<OfficeShared>,
        invocation_handler: Option<Arc<FunctionMetaData>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ProcessId::generate(),
            office,
            invocation_handler,
            objects: Mutex::new(HashMap::new()),
            live_threads: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
            completion: Arc::new(Completion::default()),
        })
    }

    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            id: self.id.clone(),
            completion: Arc::clone(&self.completion),
        }
    }

    /// Returns the process-scoped container for `index`, creating it on first use.
    pub fn container(&self, index: ManagedObjectIndex) -> Result<Arc<ManagedObjectContainer>, Escalation> {
        let mut objects = self.objects.lock();
        if let Some(container) = objects.get(&index.slot()) {
            return Ok(Arc::clone(container));
        }
        let metadata = self
            .office
            .metadata
            .objects()
            .by_index(index)
            .ok_or_else(|| Escalation::msg(format!("no managed object is bound at {index}")))?;
        let container = ManagedObjectContainer::new(Arc::clone(metadata));
        objects.insert(index.slot(), Arc::clone(&container));
        Ok(container)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn thread_started(&self) {
        self.live_threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Records that a thread state finished or abandoned its work.
    ///
    /// The last one releases the process objects and, unless the process was
    /// torn down, completes it.
    pub fn thread_finished(&self) {
        if self.live_threads.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.release_objects();
        if self.is_torn_down() {
            tracing::debug!(process = %self.id, "process objects released after tear down");
            return;
        }
        if self.completion.finish(ProcessOutcome::Completed) {
            tracing::debug!(process = %self.id, "process complete");
            self.office.hooks.emit(&ExecutionEvent::ProcessComplete {
                process: self.id.clone(),
                failed: false,
            });
        }
    }

    /// Fails the process. Thread states abandon their work on their next step;
    /// process objects stay until the last of them has.
    pub fn tear_down(&self, escalation: Escalation) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.completion.finish(ProcessOutcome::Failed(escalation)) {
            self.office.hooks.emit(&ExecutionEvent::ProcessComplete {
                process: self.id.clone(),
                failed: true,
            });
        }
    }

    fn release_objects(&self) {
        let containers: Vec<_> = self.objects.lock().drain().map(|(_, container)| container).collect();
        release_all(containers);
    }
}

/// Releases `containers`, logging objects whose release panicked.
pub(crate) fn release_all(containers: impl IntoIterator<Item = Arc<ManagedObjectContainer>>) -> usize {
    let mut released = 0;
    for container in containers {
        match catch_unwind(AssertUnwindSafe(|| container.release())) {
            Ok(true) => released += 1,
            Ok(false) => {}
            Err(_) => tracing::warn!(object = container.name(), "managed object panicked while releasing"),
        }
    }
    released
}
