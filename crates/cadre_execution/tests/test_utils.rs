//! Shared test utilities for `cadre_execution` integration tests.
//!
//! This module provides common fixtures, objects, governances and teams used
//! across multiple test files. Import via `mod test_utils;` in test files.

#![allow(
    dead_code,
    missing_docs,
    reason = "shared test utilities, not every item is used by every test binary"
)]

use cadre_core::escalation::Escalation;
use cadre_core::function::FunctionContext;
use cadre_core::governance::Governance;
use cadre_core::object::{
    Dependencies, ManagedObject, ManagedObjectSource, ManagedObjectUser, ObjectRef,
};
use cadre_core::operation::{AsyncOperation, Progress};
use cadre_core::team::{Job, Team, TeamOverloaded};
use cadre_execution::hooks::ExecutionEvent;
use cadre_execution::office::Office;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ═══════════════════════════════════════════════════════════════════════════════
// LOGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered record of what test functions, objects and governances did.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// Every event an office emitted, in order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventLog {
    /// Registers a recording observer on `office`.
    pub fn attach(office: &Office) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        office
            .hooks()
            .register_observer("event-log", move |event| {
                events.lock().unwrap().push(event.clone());
            })
            .unwrap();
        log
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ExecutionEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|event| predicate(event)).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Body that records `label` and completes.
pub fn logging(
    log: &ExecutionLog,
    label: &'static str,
) -> impl FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static {
    let log = log.clone();
    move |_ctx| {
        log.push(label);
        Ok(())
    }
}

/// Body that records `label` and fails with [`TypeErrorX`].
pub fn failing(
    log: &ExecutionLog,
    label: &'static str,
) -> impl FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static {
    let log = log.clone();
    move |_ctx| {
        log.push(label);
        Err(TypeErrorX.into())
    }
}

/// Body of an escalation handler recording `label: <cause>`.
pub fn handling(
    log: &ExecutionLog,
    label: &'static str,
) -> impl FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Clone + Send + Sync + 'static {
    let log = log.clone();
    move |ctx| {
        let cause = ctx
            .parameter::<Escalation>()
            .map_or_else(|| "<none>".to_string(), ToString::to_string);
        log.push(format!("{label}: {cause}"));
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("type error x")]
pub struct TypeErrorX;

#[derive(Debug, thiserror::Error)]
#[error("type error y")]
pub struct TypeErrorY;

// ═══════════════════════════════════════════════════════════════════════════════
// LATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Hands out an operation that stays pending until the test opens it.
#[derive(Clone, Default)]
pub struct Latch(Arc<Mutex<Option<AsyncOperation>>>);

impl Latch {
    pub fn arm(&self) -> AsyncOperation {
        let operation = AsyncOperation::new();
        *self.0.lock().unwrap() = Some(operation.clone());
        operation
    }

    /// Completes the armed operation, returning `false` if none was armed.
    pub fn open(&self) -> bool {
        let armed = self.0.lock().unwrap().take();
        armed.is_some_and(|operation| operation.complete())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MANAGED OBJECTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Object recording its release.
pub struct Tracked {
    pub name: &'static str,
    pub log: ExecutionLog,
    pub uses: usize,
}

impl Tracked {
    pub fn new(name: &'static str, log: &ExecutionLog) -> Self {
        Self {
            name,
            log: log.clone(),
            uses: 0,
        }
    }
}

impl ManagedObject for Tracked {
    fn release(&mut self) {
        self.log.push(format!("release {}", self.name));
    }
}

/// Object counting how often it is coordinated.
pub struct Connection {
    pub coordinations: Arc<AtomicUsize>,
}

impl ManagedObject for Connection {
    fn coordinate(&mut self, _dependencies: &Dependencies) -> Result<Progress, Escalation> {
        self.coordinations.fetch_add(1, Ordering::SeqCst);
        Ok(Progress::Complete)
    }
}

/// Object whose coordination waits on a [`Latch`].
pub struct SlowHandshake {
    pub latch: Latch,
    pub coordinations: Arc<AtomicUsize>,
}

impl ManagedObject for SlowHandshake {
    fn coordinate(&mut self, _dependencies: &Dependencies) -> Result<Progress, Escalation> {
        self.coordinations.fetch_add(1, Ordering::SeqCst);
        Ok(Progress::Pending(self.latch.arm()))
    }
}

/// Source that parks the request until the test provides the object.
#[derive(Clone, Default)]
pub struct DeferredSource {
    pub sourced: Arc<AtomicUsize>,
    pending: Arc<Mutex<Option<ManagedObjectUser>>>,
}

impl DeferredSource {
    /// Takes the parked request, if sourcing started.
    pub fn take_user(&self) -> Option<ManagedObjectUser> {
        self.pending.lock().unwrap().take()
    }
}

impl ManagedObjectSource for DeferredSource {
    fn source(&self, user: ManagedObjectUser) {
        self.sourced.fetch_add(1, Ordering::SeqCst);
        *self.pending.lock().unwrap() = Some(user);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GOVERNANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Governance recording each transition.
pub struct Audit {
    pub log: ExecutionLog,
}

impl Governance for Audit {
    fn activate(&mut self) -> Result<Progress, Escalation> {
        self.log.push("activate");
        Ok(Progress::Complete)
    }

    fn govern(&mut self, object: &ObjectRef) -> Result<(), Escalation> {
        self.log.push(format!("govern {}", object.name()));
        Ok(())
    }

    fn enforce(&mut self) -> Result<Progress, Escalation> {
        self.log.push("enforce");
        Ok(Progress::Complete)
    }

    fn disregard(&mut self) -> Result<Progress, Escalation> {
        self.log.push("disregard");
        Ok(Progress::Complete)
    }
}

/// Governance whose activation waits on a [`Latch`].
pub struct Latched {
    pub log: ExecutionLog,
    pub latch: Latch,
}

impl Governance for Latched {
    fn activate(&mut self) -> Result<Progress, Escalation> {
        self.log.push("activate");
        Ok(Progress::Pending(self.latch.arm()))
    }

    fn enforce(&mut self) -> Result<Progress, Escalation> {
        self.log.push("enforce");
        Ok(Progress::Complete)
    }

    fn disregard(&mut self) -> Result<Progress, Escalation> {
        self.log.push("disregard");
        Ok(Progress::Complete)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEAMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Team rejecting the first `rejections` jobs, then running jobs inline.
pub struct PickyTeam {
    rejections: AtomicUsize,
    pub offered: Arc<AtomicUsize>,
}

impl PickyTeam {
    pub fn new(rejections: usize) -> Self {
        Self {
            rejections: AtomicUsize::new(rejections),
            offered: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Team for PickyTeam {
    fn assign_job(&self, job: Box<dyn Job>) -> Result<(), TeamOverloaded> {
        self.offered.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TeamOverloaded::new(job));
        }
        job.run();
        Ok(())
    }
}
