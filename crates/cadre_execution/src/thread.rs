//! Thread states and the scheduling loop.
//!
//! A [`ThreadState`] is one logical thread of control of a process. It owns a
//! tree of [`ExecutionNode`]s, the flows they belong to, its thread-scoped
//! managed objects and one governance container per office governance.
//!
//! At most one executor runs a thread state at a time. Work for a busy thread
//! state is queued as an [`Activation`] and drained by whoever is executing it.
//!
//! # Safety modes
//!
//! The loop starts [`SafetyMode::Unprotected`]: the thread state lock is held
//! for the whole run, user code included. Once a node is resumed from an
//! asynchronous completion or is processed by a responsible team, the thread
//! state switches to [`SafetyMode::Protected`] for the rest of its life. The
//! lock is then released around every call into user code and fairly bumped
//! between steps.

use core::any::Any;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use cadre_core::administration::{AdministrationContext, AdministrationMetaData, AdministrationPhase};
use cadre_core::escalation::{Escalation, EscalationLevel, ExecutionError};
use cadre_core::function::{
    FlowCallback, FlowKind, FlowRequest, FunctionContext, FunctionMetaData, ObjectSlot, Parameter,
};
use cadre_core::governance::{DeactivationStrategy, GovernanceContainer};
use cadre_core::index::{ManagedObjectIndex, ManagedObjectScope, ObjectBinding};
use cadre_core::object::{Dependencies, ManagedObjectContainer, ObjectRef};
use cadre_core::operation::{AsyncOperation, Progress};
use cadre_core::team::{TeamId, TeamMetaData};
use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::driver::{self, ThreadJob, Work};
use crate::hooks::ExecutionEvent;
use crate::node::{ExecutionNode, Flow, FlowId, FunctionState, NodeArena, NodeId};
use crate::office::OfficeShared;
use crate::process::{ProcessState, release_all};

static NEXT_THREAD: AtomicU64 = AtomicU64::new(0);

/// Whether the loop shares the thread state lock with concurrent resumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    /// The lock is held for the whole run.
    Unprotected,
    /// The lock is released around user code and bumped between steps.
    Protected,
}

/// Work queued for a thread state.
pub(crate) enum Activation {
    /// Continue at a node.
    Run(NodeId),
    /// Continue at a node suspended on an asynchronous operation.
    Resume(NodeId),
    /// Deliver the completion of an asynchronous flow.
    Callback {
        callback: FlowCallback,
        outcome: Option<Escalation>,
    },
}

#[derive(Default)]
struct Schedule {
    executing: bool,
    pending: VecDeque<Activation>,
}

/// Mutable state guarded by the thread state lock.
pub(crate) struct ThreadInner {
    pub nodes: NodeArena<ExecutionNode>,
    pub flows: HashMap<FlowId, Flow>,
    next_flow: u64,
    /// Thread scoped containers, keyed by slot.
    pub objects: HashMap<usize, Arc<ManagedObjectContainer>>,
    /// One container per office governance. Taken out while user code runs.
    pub governance: Vec<Option<GovernanceContainer>>,
    /// Next global level searched for unhandled escalations.
    pub escalation_level: Option<EscalationLevel>,
    /// Callback of the asynchronous flow this thread state runs, with the
    /// thread state that instigated it.
    pub completion_callback: Option<(FlowCallback, Arc<ThreadState>)>,
    /// Asynchronous flows instigated here whose callbacks are outstanding.
    pub pending_callbacks: usize,
    pub completed: bool,
}

impl ThreadInner {
    pub fn new_flow(&mut self, callback: Option<FlowCallback>) -> FlowId {
        self.next_flow += 1;
        let id = FlowId(self.next_flow);
        self.flows.insert(id, Flow { live: 0, callback });
        id
    }

    pub fn insert(&mut self, node: ExecutionNode) -> NodeId {
        if let Some(flow) = self.flows.get_mut(&node.flow) {
            flow.live += 1;
        }
        self.nodes.insert(node)
    }

    /// Follows `parallel` links down from `id`.
    pub fn deepest_parallel(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parallel) = self.nodes.get(current).and_then(|node| node.parallel) {
            current = parallel;
        }
        current
    }
}

/// One logical thread of control.
pub(crate) struct ThreadState {
    pub id: u64,
    pub process: Arc<ProcessState>,
    pub(crate) inner: Mutex<ThreadInner>,
    schedule: Mutex<Schedule>,
    protected: AtomicBool,
    /// Set when an awaited asynchronous operation failed.
    pub(crate) resource_failure: AtomicBool,
}

impl ThreadState {
    pub fn new(process: Arc<ProcessState>) -> Arc<Self> {
        process.thread_started();
        let governance = process
            .office
            .metadata
            .governances()
            .iter()
            .map(|metadata| Some(GovernanceContainer::new(Arc::clone(metadata))))
            .collect();
        Arc::new(Self {
            id: NEXT_THREAD.fetch_add(1, Ordering::Relaxed),
            process,
            inner: Mutex::new(ThreadInner {
                nodes: NodeArena::new(),
                flows: HashMap::new(),
                next_flow: 0,
                objects: HashMap::new(),
                governance,
                escalation_level: Some(EscalationLevel::Flow),
                completion_callback: None,
                pending_callbacks: 0,
                completed: false,
            }),
            schedule: Mutex::new(Schedule::default()),
            protected: AtomicBool::new(false),
            resource_failure: AtomicBool::new(false),
        })
    }

    /// Creates the root node and activates it.
    pub fn start(self: &Arc<Self>, function: Arc<FunctionMetaData>, parameter: Option<Parameter>) {
        let root = {
            let mut inner = self.inner.lock();
            let flow = inner.new_flow(None);
            inner.insert(ExecutionNode::new(function, flow, parameter))
        };
        self.activate(Activation::Run(root));
    }

    /// Queues `activation`, starting an executor if none is running.
    pub fn activate(self: &Arc<Self>, activation: Activation) {
        {
            let mut schedule = self.schedule.lock();
            schedule.pending.push_back(activation);
            if schedule.executing {
                return;
            }
            schedule.executing = true;
        }
        driver::submit(Work::Run {
            thread: Arc::clone(self),
            executor: None,
            first: None,
        });
    }

    /// Makes `node` escalate `cause` on its next step.
    pub fn inject_failure(&self, node: NodeId, cause: Escalation) {
        if let Some(node) = self.inner.lock().nodes.get_mut(node) {
            node.pending_failure = Some(cause);
        }
    }

    /// Returns `true` once protected mode has been engaged.
    pub fn is_protected(&self) -> bool {
        self.protected.load(Ordering::Acquire)
    }

    /// Drains activations until none are left or the thread state is handed
    /// to a team.
    pub fn run(self: &Arc<Self>, executor: Option<TeamId>, first: Option<Activation>) {
        let _span = tracing::debug_span!(
            "thread",
            process = %self.process.id,
            thread = self.id,
            executor = executor.map(|team| team.index()),
        )
        .entered();

        let mut next = first;
        loop {
            let activation = match next.take() {
                Some(activation) => activation,
                None => {
                    let mut schedule = self.schedule.lock();
                    match schedule.pending.pop_front() {
                        Some(activation) => activation,
                        None => {
                            schedule.executing = false;
                            return;
                        }
                    }
                }
            };

            match self.execute(activation, executor) {
                Exit::Idle => {}
                Exit::Handoff {
                    node,
                    function,
                    team,
                } => {
                    driver::submit(Work::Assign {
                        job: Box::new(ThreadJob {
                            thread: Arc::clone(self),
                            node,
                            team: team.id(),
                        }),
                        thread: Arc::clone(self),
                        function,
                        team,
                        attempts: 0,
                    });
                    return;
                }
            }
        }
    }

    fn execute(self: &Arc<Self>, activation: Activation, executor: Option<TeamId>) -> Exit {
        let mode = if self.is_protected() {
            SafetyMode::Protected
        } else {
            SafetyMode::Unprotected
        };
        let mut runner = Runner {
            thread: self,
            inner: self.inner.lock(),
            mode,
            executor,
            office: &self.process.office,
        };

        match activation {
            Activation::Run(node) => runner.run_loop(node),
            Activation::Resume(node) => {
                let Some(suspended) = runner.inner.nodes.get_mut(node) else {
                    return Exit::Idle;
                };
                if !suspended.suspended {
                    return Exit::Idle;
                }
                suspended.suspended = false;
                suspended.resumed = true;
                runner.run_loop(node)
            }
            Activation::Callback { callback, outcome } => {
                runner.inner.pending_callbacks = runner.inner.pending_callbacks.saturating_sub(1);
                if let Err(cause) = runner.call_user("flow callback", move || callback(outcome)) {
                    tracing::error!(error = %cause, "asynchronous flow callback failed");
                }
                runner.maybe_complete();
                Exit::Idle
            }
        }
    }
}

/// Why a loop run ended.
pub(crate) enum Exit {
    /// Nothing left to do on this activation.
    Idle,
    /// The node must run on another team.
    Handoff {
        node: NodeId,
        function: String,
        team: Arc<TeamMetaData>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// One executor's hold on a thread state.
pub(crate) struct Runner<'a> {
    pub thread: &'a Arc<ThreadState>,
    pub inner: MutexGuard<'a, ThreadInner>,
    pub mode: SafetyMode,
    pub executor: Option<TeamId>,
    pub office: &'a OfficeShared,
}

impl Runner<'_> {
    fn run_loop(&mut self, start: NodeId) -> Exit {
        let mut current = Some(start);
        while let Some(id) = current {
            if self.thread.process.is_torn_down() {
                self.abandon();
                return Exit::Idle;
            }
            let Some(node) = self.inner.nodes.get_mut(id) else {
                break;
            };

            if let Some(cause) = node.pending_failure.take() {
                node.resumed = false;
                node.suspended = false;
                current = self.escalate(id, cause);
                continue;
            }
            if node.suspended {
                break;
            }

            let team = node.function.team();
            let needs_protection = node.resumed || team.is_some();
            node.resumed = false;
            if !node.started {
                node.started = true;
                let function = node.name().to_string();
                self.emit(|process| ExecutionEvent::FunctionStart { process, function });
            }

            if let Some(team) = team
                && self.executor != Some(team)
            {
                let function = self.function(id).map(|function| function.name().to_string());
                let Some(metadata) = self.office.metadata.team(team).cloned() else {
                    current = self.escalate(id, Escalation::msg(format!("{team} is not registered")));
                    continue;
                };
                self.engage_protection(function.as_deref().unwrap_or_default());
                return Exit::Handoff {
                    node: id,
                    function: function.unwrap_or_default(),
                    team: metadata,
                };
            }
            if needs_protection && self.mode == SafetyMode::Unprotected {
                let function = self.function(id).map(|function| function.name().to_string());
                self.engage_protection(function.as_deref().unwrap_or_default());
            }

            current = self.step(id);
            if self.mode == SafetyMode::Protected {
                MutexGuard::bump(&mut self.inner);
            }
        }
        Exit::Idle
    }

    fn engage_protection(&mut self, function: &str) {
        self.mode = SafetyMode::Protected;
        if !self.thread.protected.swap(true, Ordering::AcqRel) {
            tracing::debug!(function, "protection engaged");
            let function = function.to_string();
            self.emit(|process| ExecutionEvent::ProtectionEngaged { process, function });
        }
    }

    fn step(&mut self, id: NodeId) -> Option<NodeId> {
        let state = self.inner.nodes.get(id)?.state;
        tracing::trace!(node = %id, %state, "step");
        match state {
            FunctionState::LoadManagedObjects => self.load(id),
            FunctionState::GovernManagedObjects => self.govern(id),
            FunctionState::CoordinateManagedObjects => self.coordinate(id),
            FunctionState::Execute => self.execute(id),
            FunctionState::HandleCompletion => self.handle_completion(id),
            FunctionState::ActivateNextInFlow => self.activate_next(id),
            FunctionState::Completed | FunctionState::Failed => None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn emit(&self, event: impl FnOnce(crate::process::ProcessId) -> ExecutionEvent) {
        self.office.hooks.emit(&event(self.thread.process.id.clone()));
    }

    pub(crate) fn function(&self, id: NodeId) -> Option<Arc<FunctionMetaData>> {
        self.inner.nodes.get(id).map(|node| Arc::clone(&node.function))
    }

    /// Runs user code, converting panics into escalations.
    pub(crate) fn call_user<R>(&mut self, label: &str, f: impl FnOnce() -> R) -> Result<R, Escalation> {
        let outcome = match self.mode {
            SafetyMode::Unprotected => catch_unwind(AssertUnwindSafe(f)),
            SafetyMode::Protected => {
                MutexGuard::unlocked(&mut self.inner, || catch_unwind(AssertUnwindSafe(f)))
            }
        };
        outcome.map_err(|payload| {
            ExecutionError::FunctionPanicked {
                function: label.to_string(),
                message: panic_message(payload.as_ref()),
            }
            .into()
        })
    }

    /// Returns the container backing `index` for node `id`.
    fn container(
        &mut self,
        id: NodeId,
        index: ManagedObjectIndex,
    ) -> Result<Arc<ManagedObjectContainer>, Escalation> {
        if index.scope() == ManagedObjectScope::Process {
            return self.thread.process.container(index);
        }

        let metadata = self
            .office
            .metadata
            .objects()
            .by_index(index)
            .ok_or_else(|| Escalation::msg(format!("no managed object is bound at {index}")))?;
        let inner = &mut *self.inner;
        let objects = match index.scope() {
            ManagedObjectScope::Function => {
                &mut inner
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| Escalation::msg(format!("{id} is no longer scheduled")))?
                    .objects
            }
            _ => &mut inner.objects,
        };
        let container = objects
            .entry(index.slot())
            .or_insert_with(|| ManagedObjectContainer::new(Arc::clone(metadata)));
        Ok(Arc::clone(container))
    }

    /// Runs `f` on the governance container at `index` outside the lock.
    fn with_governance<R>(
        &mut self,
        index: usize,
        label: &str,
        f: impl FnOnce(&mut GovernanceContainer) -> R,
    ) -> Option<Result<R, Escalation>> {
        let mut container = self.inner.governance.get_mut(index)?.take()?;
        let metadata = Arc::clone(container.metadata());
        let outcome = self.call_user(label, move || {
            let result = f(&mut container);
            (container, result)
        });
        Some(match outcome {
            Ok((container, result)) => {
                self.inner.governance[index] = Some(container);
                Ok(result)
            }
            Err(cause) => {
                self.inner.governance[index] = Some(GovernanceContainer::new(metadata));
                Err(cause)
            }
        })
    }

    /// Parks `id` until `operation` finishes.
    fn suspend(&mut self, id: NodeId, operation: AsyncOperation) -> Option<NodeId> {
        let node = self.inner.nodes.get_mut(id)?;
        node.suspended = true;
        let timeout = node.function.async_timeout();
        let function = node.name().to_string();
        tracing::debug!(function = %function, ?timeout, "function suspended");
        self.emit(|process| ExecutionEvent::FunctionSuspended { process, function });

        self.office.monitor.watch(&operation, timeout);
        let thread = Arc::clone(self.thread);
        operation.when_complete(move |outcome| {
            if outcome.is_err() {
                thread.resource_failure.store(true, Ordering::Release);
            }
            thread.activate(Activation::Resume(id));
        });
        None
    }

    fn set_state(&mut self, id: NodeId, state: FunctionState) -> Option<NodeId> {
        self.inner.nodes.get_mut(id)?.state = state;
        Some(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // LOAD / GOVERN / COORDINATE
    // ─────────────────────────────────────────────────────────────────────────

    fn load(&mut self, id: NodeId) -> Option<NodeId> {
        let function = self.function(id)?;
        let required = function.required_objects();

        loop {
            let cursor = self.inner.nodes.get(id)?.object_cursor;
            let Some(&index) = required.get(cursor) else {
                break;
            };
            let container = match self.container(id, index) {
                Ok(container) => container,
                Err(cause) => return self.escalate(id, cause),
            };
            let name = container.name().to_string();
            match self.call_user(&name, move || container.load()).and_then(|loaded| loaded) {
                Ok(Progress::Complete) => self.inner.nodes.get_mut(id)?.object_cursor += 1,
                Ok(Progress::Pending(operation)) => return self.suspend(id, operation),
                Err(cause) => return self.escalate(id, cause),
            }
        }

        self.set_state(id, FunctionState::GovernManagedObjects)
    }

    fn govern(&mut self, id: NodeId) -> Option<NodeId> {
        let function = self.function(id)?;
        let Some(required) = function.required_governance() else {
            return self.set_state(id, FunctionState::CoordinateManagedObjects);
        };
        let strategy = self.inner.nodes.get(id)?.strategy;

        loop {
            let cursor = self.inner.nodes.get(id)?.governance_cursor;
            let Some(Some(container)) = self.inner.governance.get_mut(cursor) else {
                break;
            };

            if let Some(transition) = container.transition().cloned() {
                match transition.outcome() {
                    None => return self.suspend(id, transition),
                    Some(Err(cause)) => {
                        container.clear_transition();
                        return self.escalate(id, cause);
                    }
                    Some(Ok(())) => container.clear_transition(),
                }
            }

            let needed = required.get(cursor).is_some_and(|bit| *bit);
            let transition = match (needed, container.is_active()) {
                (true, false) => Some(None),
                (false, true) => Some(Some(strategy)),
                _ => None,
            };

            if let Some(deactivate) = transition {
                let label = container.metadata().name().to_string();
                let result = self.with_governance(cursor, &label, move |container| match deactivate {
                    None => container.activate(),
                    Some(strategy) => container.deactivate(strategy),
                });
                match result.map(|outcome| outcome.and_then(|progress| progress)) {
                    Some(Ok(Progress::Pending(operation))) => {
                        if let Some(Some(container)) = self.inner.governance.get_mut(cursor) {
                            container.set_transition(operation.clone());
                        }
                        return self.suspend(id, operation);
                    }
                    Some(Err(cause)) => return self.escalate(id, cause),
                    Some(Ok(Progress::Complete)) | None => {}
                }
            }
            self.inner.nodes.get_mut(id)?.governance_cursor += 1;
        }

        if !self.inner.nodes.get(id)?.governed {
            self.inner.nodes.get_mut(id)?.governed = true;
            if let Err(cause) = self.govern_objects(id, &function) {
                return self.escalate(id, cause);
            }
        }
        self.set_state(id, FunctionState::CoordinateManagedObjects)
    }

    /// Brings the node's objects under each active governance they are subject to.
    fn govern_objects(&mut self, id: NodeId, function: &FunctionMetaData) -> Result<(), Escalation> {
        let Some(required) = function.required_governance() else {
            return Ok(());
        };
        for &index in function.required_objects() {
            let container = self.container(id, index)?;
            for &governance in container.metadata().governances() {
                let applies = required.get(governance).is_some_and(|bit| *bit)
                    && matches!(self.inner.governance.get(governance), Some(Some(active)) if active.is_active());
                if !applies {
                    continue;
                }
                let object = container.object_ref();
                if let Some(result) = self.with_governance(governance, container.name(), move |active| {
                    active.govern(&object)
                }) {
                    result.and_then(|governed| governed)?;
                }
            }
        }
        Ok(())
    }

    fn coordinate(&mut self, id: NodeId) -> Option<NodeId> {
        let function = self.function(id)?;
        let required = function.required_objects();

        loop {
            let cursor = self.inner.nodes.get(id)?.coordinate_cursor;
            let Some(&index) = required.get(cursor) else {
                break;
            };
            let prepared = self.container(id, index).and_then(|container| {
                let mut dependencies = Dependencies::new();
                for dependency in container.metadata().dependencies() {
                    let object = self.container(id, dependency.index)?;
                    dependencies.insert(dependency.key.clone(), object.object_ref());
                }
                Ok((container, dependencies))
            });
            let (container, dependencies) = match prepared {
                Ok(prepared) => prepared,
                Err(cause) => return self.escalate(id, cause),
            };

            let name = container.name().to_string();
            match self
                .call_user(&name, move || container.coordinate(&dependencies))
                .and_then(|coordinated| coordinated)
            {
                Ok(Progress::Complete) => self.inner.nodes.get_mut(id)?.coordinate_cursor += 1,
                Ok(Progress::Pending(operation)) => return self.suspend(id, operation),
                Err(cause) => return self.escalate(id, cause),
            }
        }

        self.set_state(id, FunctionState::Execute)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // EXECUTE
    // ─────────────────────────────────────────────────────────────────────────

    fn execute(&mut self, id: NodeId) -> Option<NodeId> {
        let function = self.function(id)?;
        let name = function.name();

        let instance = match self.inner.nodes.get_mut(id)?.instance.take() {
            Some(instance) => instance,
            None => match self.call_user(name, || function.create()) {
                Ok(instance) => instance,
                Err(cause) => return self.escalate(id, cause),
            },
        };

        let mut slots = Vec::with_capacity(function.objects().len());
        for object in function.objects() {
            let slot = match object.binding {
                ObjectBinding::Parameter => ObjectSlot::parameter(&object.name),
                ObjectBinding::Managed(index) => match self.container(id, index) {
                    Ok(container) => ObjectSlot::managed(&object.name, container.object_ref()),
                    Err(cause) => return self.escalate(id, cause),
                },
            };
            slots.push(slot);
        }

        if !self.inner.nodes.get(id)?.administered {
            self.inner.nodes.get_mut(id)?.administered = true;
            for duty in function.pre_administration() {
                if let Err(cause) = self.administer(id, &function, duty, AdministrationPhase::Pre) {
                    return self.escalate(id, cause);
                }
            }
        }

        let parameter = self.inner.nodes.get_mut(id)?.parameter.take();
        let body = Arc::clone(&function);
        let executed = self.call_user(name, move || {
            let mut instance = instance;
            let mut parameter = parameter;
            let (result, outcome) = {
                let mut context = FunctionContext::new(body.name(), &slots, &mut parameter);
                let result = instance.execute(&mut context);
                (result, context.into_outcome())
            };
            (instance, parameter, result, outcome)
        });
        let (instance, parameter, result, outcome) = match executed {
            Ok(executed) => executed,
            Err(cause) => return self.escalate(id, cause),
        };

        let node = self.inner.nodes.get_mut(id)?;
        node.instance = Some(instance);
        node.parameter = parameter;
        node.passes += 1;
        let pass = node.passes;
        let function_name = name.to_string();
        self.emit(|process| ExecutionEvent::FunctionExecuted {
            process,
            function: function_name,
            pass,
        });

        if let Err(cause) = result {
            return self.escalate(id, cause);
        }

        let complete = !outcome.not_complete;
        if let Some(result) = outcome.result {
            self.inner.nodes.get_mut(id)?.result = Some(result.0);
        }
        if complete {
            for duty in function.post_administration() {
                if let Err(cause) = self.administer(id, &function, duty, AdministrationPhase::Post) {
                    return self.escalate(id, cause);
                }
            }
        }

        for request in outcome.flows {
            if let Err(cause) = self.instigate(id, request) {
                return self.escalate(id, cause);
            }
        }

        let state = if complete {
            FunctionState::HandleCompletion
        } else {
            FunctionState::Execute
        };
        let node = self.inner.nodes.get_mut(id)?;
        node.state = state;
        if node.parallel.is_some() {
            return Some(self.inner.deepest_parallel(id));
        }
        Some(id)
    }

    fn administer(
        &mut self,
        id: NodeId,
        function: &FunctionMetaData,
        duty: &AdministrationMetaData,
        phase: AdministrationPhase,
    ) -> Result<(), Escalation> {
        let mut objects: Vec<ObjectRef> = Vec::with_capacity(duty.objects().len());
        for &index in duty.objects() {
            objects.push(self.container(id, index)?.object_ref());
        }
        let name = function.name();
        self.call_user(duty.name(), move || {
            let mut administration = duty.create();
            administration.administer(&AdministrationContext::new(name, phase, &objects))
        })
        .and_then(|administered| administered)
    }

    /// Links the node for an instigated flow into the tree.
    fn instigate(&mut self, id: NodeId, request: FlowRequest) -> Result<(), Escalation> {
        let FlowRequest {
            function: name,
            kind,
            parameter,
            callback,
        } = request;
        let function = self
            .office
            .metadata
            .function(&name)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownFunction(name.clone()))?;
        if !function.accepts(parameter.as_ref()) {
            return Err(ExecutionError::ParameterTypeMismatch {
                function: name,
                expected: function.parameter_type().map_or("()", |info| info.name()),
            }
            .into());
        }
        tracing::trace!(function = %name, ?kind, "flow instigated");

        match kind {
            FlowKind::Sequential => {
                let (after, owner) = {
                    let node = self.inner.nodes.get(id).ok_or_else(|| Escalation::msg("instigating node vanished"))?;
                    let after = node
                        .sequential_tail
                        .filter(|tail| self.inner.nodes.contains(*tail))
                        .unwrap_or(id);
                    (after, node.parallel_owner)
                };
                let successor = self.inner.nodes.get(after).and_then(|node| node.next);
                let flow = self.inner.new_flow(callback);
                let mut node = ExecutionNode::new(function, flow, parameter);
                node.next = successor;
                node.parallel_owner = owner;
                let created = self.inner.insert(node);
                if let Some(after) = self.inner.nodes.get_mut(after) {
                    after.next = Some(created);
                }
                if let Some(instigator) = self.inner.nodes.get_mut(id) {
                    instigator.sequential_tail = Some(created);
                }
            }
            FlowKind::Parallel => {
                let flow = self.inner.new_flow(callback);
                let mut node = ExecutionNode::new(function, flow, parameter);
                node.parallel_owner = Some(id);
                let created = self.inner.insert(node);

                let mut tail = self.inner.nodes.get(id).and_then(|node| node.parallel);
                match tail {
                    None => {
                        if let Some(owner) = self.inner.nodes.get_mut(id) {
                            owner.parallel = Some(created);
                        }
                    }
                    Some(_) => {
                        while let Some(next) = tail.and_then(|current| self.inner.nodes.get(current)).and_then(|node| node.next) {
                            tail = Some(next);
                        }
                        if let Some(last) = tail.and_then(|current| self.inner.nodes.get_mut(current)) {
                            last.next = Some(created);
                        }
                    }
                }
            }
            FlowKind::Asynchronous => {
                let child = ThreadState::new(Arc::clone(&self.thread.process));
                let root = {
                    let mut inner = child.inner.lock();
                    let flow = inner.new_flow(None);
                    let root = inner.insert(ExecutionNode::new(function, flow, parameter));
                    if let Some(callback) = callback {
                        inner.completion_callback = Some((callback, Arc::clone(self.thread)));
                        self.inner.pending_callbacks += 1;
                    }
                    root
                };
                child.activate(Activation::Run(root));
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HANDLE_COMPLETION / ACTIVATE_NEXT_IN_FLOW
    // ─────────────────────────────────────────────────────────────────────────

    fn handle_completion(&mut self, id: NodeId) -> Option<NodeId> {
        let function = self.function(id)?;
        let node = self.inner.nodes.get_mut(id)?;

        if node.sequential_tail.is_none()
            && let Some(next) = function.next()
        {
            let parameter = node.result.take();
            let (flow, successor, owner) = (node.flow, node.next, node.parallel_owner);
            let Some(next_function) = self.office.metadata.function_by_id(next).cloned() else {
                return self.escalate(id, Escalation::msg(format!("{next} is not registered")));
            };
            if !next_function.accepts(parameter.as_ref()) {
                let cause = ExecutionError::ParameterTypeMismatch {
                    function: next_function.name().to_string(),
                    expected: next_function.parameter_type().map_or("()", |info| info.name()),
                };
                return self.escalate(id, cause.into());
            }

            let mut node = ExecutionNode::new(next_function, flow, parameter);
            node.next = successor;
            node.parallel_owner = owner;
            let created = self.inner.insert(node);
            self.inner.nodes.get_mut(id)?.next = Some(created);
        }

        let function = function.name().to_string();
        self.emit(|process| ExecutionEvent::CompletionHandled { process, function });
        self.set_state(id, FunctionState::ActivateNextInFlow)
    }

    fn activate_next(&mut self, id: NodeId) -> Option<NodeId> {
        let mut node = self.inner.nodes.remove(id)?;
        node.state = FunctionState::Completed;
        let function = node.name().to_string();
        tracing::debug!(function = %function, passes = node.passes, "function complete");

        let (next, owner, flow) = (node.next, node.parallel_owner, node.flow);
        if node.global_handler.is_some() {
            self.inner.escalation_level = Some(EscalationLevel::Flow);
        }
        let objects = node.take_objects();
        drop(node);
        self.release(&function, objects);
        self.emit(|process| ExecutionEvent::FunctionComplete { process, function });
        self.finish_flow(flow, None);

        if let Some(owner_id) = owner
            && let Some(owner) = self.inner.nodes.get_mut(owner_id)
            && owner.parallel == Some(id)
        {
            owner.parallel = next;
        }

        if let Some(next) = next.filter(|next| self.inner.nodes.contains(*next)) {
            return Some(next);
        }
        if let Some(owner) = owner.filter(|owner| self.inner.nodes.contains(*owner)) {
            return Some(owner);
        }
        self.maybe_complete();
        None
    }

    /// Releases containers under the panic guard.
    pub(crate) fn release(&mut self, label: &str, objects: Vec<Arc<ManagedObjectContainer>>) {
        if objects.is_empty() {
            return;
        }
        if let Err(cause) = self.call_user(label, move || release_all(objects)) {
            tracing::warn!(error = %cause, "releasing managed objects failed");
        }
    }

    /// Counts a node of `flow` as gone, running the flow callback with the last one.
    pub(crate) fn finish_flow(&mut self, flow: FlowId, outcome: Option<Escalation>) {
        let Some(entry) = self.inner.flows.get_mut(&flow) else {
            return;
        };
        entry.live = entry.live.saturating_sub(1);
        if entry.live > 0 {
            return;
        }
        let callback = self.inner.flows.remove(&flow).and_then(|entry| entry.callback);
        if let Some(callback) = callback
            && let Err(cause) = self.call_user("flow callback", move || callback(outcome))
        {
            tracing::error!(%flow, error = %cause, "flow callback failed");
        }
    }

    /// Finishes the thread state once no nodes or callbacks remain.
    pub(crate) fn maybe_complete(&mut self) {
        if !self.inner.nodes.is_empty() || self.inner.pending_callbacks > 0 || self.inner.completed {
            return;
        }
        self.inner.completed = true;

        for index in 0..self.inner.governance.len() {
            let active = matches!(self.inner.governance[index], Some(ref container) if container.is_active());
            if !active {
                continue;
            }
            match self.with_governance(index, "governance", |container| {
                container.deactivate(DeactivationStrategy::Enforce)
            }) {
                Some(Ok(Ok(Progress::Pending(_)))) => {
                    tracing::warn!(governance = index, "governance enforcement still pending at thread end");
                }
                Some(Ok(Err(cause)) | Err(cause)) => {
                    tracing::warn!(governance = index, error = %cause, "governance enforcement failed at thread end");
                }
                Some(Ok(Ok(Progress::Complete))) | None => {}
            }
        }

        let objects: Vec<_> = self.inner.objects.drain().map(|(_, container)| container).collect();
        self.release("thread objects", objects);

        if let Some((callback, parent)) = self.inner.completion_callback.take() {
            parent.activate(Activation::Callback {
                callback,
                outcome: None,
            });
        }
        tracing::debug!("thread state complete");
        self.thread.process.thread_finished();
    }

    /// Drops every node after the process was torn down.
    pub(crate) fn abandon(&mut self) {
        let ids: Vec<NodeId> = self.inner.nodes.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(mut node) = self.inner.nodes.remove(id) {
                node.state = FunctionState::Failed;
                let objects = node.take_objects();
                self.release("abandoned node", objects);
            }
        }
        self.inner.flows.clear();
        if self.inner.completed {
            return;
        }
        self.inner.completed = true;
        self.inner.completion_callback = None;

        for index in 0..self.inner.governance.len() {
            let _ = self.with_governance(index, "governance", |container| {
                container.deactivate(DeactivationStrategy::Disregard)
            });
        }
        let objects: Vec<_> = self.inner.objects.drain().map(|(_, container)| container).collect();
        self.release("thread objects", objects);
        tracing::debug!("thread state abandoned");
        self.thread.process.thread_finished();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
