//! Functions: the schedulable units of work.
//!
//! A function is described once by its [`FunctionMetaData`] and instantiated
//! per invocation from its factory. During execution it receives a
//! [`FunctionContext`] through which it reaches its managed objects and
//! parameter, instigates further flows and reports whether it has completed.
//!
//! # Example
//!
//! ```
//! use cadre_core::function::{FlowKind, FunctionContext, from_fn};
//!
//! let mut remaining = 3;
//! let mut function = from_fn(move |ctx: &mut FunctionContext<'_>| {
//!     remaining -= 1;
//!     if remaining > 0 {
//!         ctx.mark_not_complete();
//!     } else {
//!         ctx.do_flow("notify", FlowKind::Sequential);
//!     }
//!     Ok(())
//! });
//! # let _ = &mut function;
//! ```

use core::any::Any;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::time::Duration;
use std::sync::Arc;

use bitvec::vec::BitVec;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use crate::administration::AdministrationMetaData;
use crate::escalation::{Escalation, EscalationProcedure};
use crate::index::{ManagedObjectIndex, ObjectBinding, TypeInfo};
use crate::object::{ObjectAccessError, ObjectRef};
use crate::team::TeamId;

/// Value passed between functions.
pub type Parameter = Box<dyn Any + Send>;

/// Invoked once an instigated flow completes, with the escalation that
/// unwound it if it did not complete normally.
pub type FlowCallback = Box<dyn FnOnce(Option<Escalation>) + Send>;

// ─────────────────────────────────────────────────────────────────────────────
// ManagedFunction
// ─────────────────────────────────────────────────────────────────────────────

/// Runnable body of a function.
pub trait ManagedFunction: Send + 'static {
    /// Executes one pass of the function.
    fn execute(&mut self, context: &mut FunctionContext<'_>) -> Result<(), Escalation>;
}

/// Function built from a closure. See [`from_fn`].
pub struct FnFunction<F>(F);

/// Wraps a closure as a [`ManagedFunction`].
pub fn from_fn<F>(f: F) -> FnFunction<F>
where
    F: FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Send + 'static,
{
    FnFunction(f)
}

impl<F> ManagedFunction for FnFunction<F>
where
    F: FnMut(&mut FunctionContext<'_>) -> Result<(), Escalation> + Send + 'static,
{
    fn execute(&mut self, context: &mut FunctionContext<'_>) -> Result<(), Escalation> {
        (self.0)(context)
    }
}

/// Factory creating function instances.
pub type FunctionFactory = Arc<dyn Fn() -> Box<dyn ManagedFunction> + Send + Sync>;

/// Handler invoked for escalations reaching the office or invocation level.
///
/// Returning an escalation passes it on to the next level.
pub type EscalationHandler = Arc<dyn Fn(&Escalation) -> Result<(), Escalation> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Flows
// ─────────────────────────────────────────────────────────────────────────────

/// How an instigated flow relates to the instigating function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Runs after the instigating function completes, before its successor.
    Sequential,
    /// Runs to completion before the instigating function resumes.
    Parallel,
    /// Runs in its own thread state with no ordering guarantee.
    Asynchronous,
}

/// A flow requested during execution.
pub struct FlowRequest {
    /// Name of the function starting the flow.
    pub function: String,
    /// How the flow is linked.
    pub kind: FlowKind,
    /// Parameter for the function.
    pub parameter: Option<Parameter>,
    /// Callback run when the flow completes.
    pub callback: Option<FlowCallback>,
}

impl fmt::Debug for FlowRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRequest")
            .field("function", &self.function)
            .field("kind", &self.kind)
            .field("has_parameter", &self.parameter.is_some())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object access
// ─────────────────────────────────────────────────────────────────────────────

/// A declared object as seen by an executing function.
#[derive(Debug, Clone)]
pub struct ObjectSlot {
    name: String,
    object: Option<ObjectRef>,
}

impl ObjectSlot {
    /// A slot backed by a managed object.
    #[must_use]
    pub fn managed(name: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            name: name.into(),
            object: Some(object),
        }
    }

    /// A slot backed by the function's parameter.
    #[must_use]
    pub fn parameter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object: None,
        }
    }

    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Shared borrow of a declared object.
pub enum ObjectGuard<'a, T> {
    /// Borrowed from a managed object.
    Managed(MappedRwLockReadGuard<'a, T>),
    /// Borrowed from the parameter.
    Parameter(&'a T),
}

impl<T> Deref for ObjectGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Managed(guard) => guard,
            Self::Parameter(value) => value,
        }
    }
}

/// Exclusive borrow of a declared object.
pub enum ObjectGuardMut<'a, T> {
    /// Borrowed from a managed object.
    Managed(MappedRwLockWriteGuard<'a, T>),
    /// Borrowed from the parameter.
    Parameter(&'a mut T),
}

impl<T> Deref for ObjectGuardMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Managed(guard) => guard,
            Self::Parameter(value) => value,
        }
    }
}

impl<T> DerefMut for ObjectGuardMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Managed(guard) => guard,
            Self::Parameter(value) => value,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FunctionContext
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one execution pass produced.
#[derive(Debug, Default)]
pub struct FunctionOutcome {
    /// Parameter for the next function, if set.
    pub result: Option<ResultParameter>,
    /// Flows instigated, in request order.
    pub flows: Vec<FlowRequest>,
    /// Whether the function asked to execute again.
    pub not_complete: bool,
}

/// Wrapper giving [`Parameter`] a `Debug` implementation.
pub struct ResultParameter(pub Parameter);

impl fmt::Debug for ResultParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultParameter(..)")
    }
}

/// Execution context handed to [`ManagedFunction::execute`].
pub struct FunctionContext<'a> {
    function: &'a str,
    objects: &'a [ObjectSlot],
    parameter: &'a mut Option<Parameter>,
    outcome: FunctionOutcome,
}

impl<'a> FunctionContext<'a> {
    /// Creates a context over the given objects and parameter.
    pub fn new(
        function: &'a str,
        objects: &'a [ObjectSlot],
        parameter: &'a mut Option<Parameter>,
    ) -> Self {
        Self {
            function,
            objects,
            parameter,
            outcome: FunctionOutcome::default(),
        }
    }

    /// Name of the executing function.
    #[must_use]
    pub fn function(&self) -> &str {
        self.function
    }

    /// Borrows the declared object `name` as `T`.
    pub fn object<T: Any + Send + Sync>(
        &self,
        name: &str,
    ) -> Result<ObjectGuard<'_, T>, ObjectAccessError> {
        let slot = self.slot(name)?;
        self.borrow_slot(slot)
    }

    /// Borrows the declared object at `position` as `T`.
    pub fn object_at<T: Any + Send + Sync>(
        &self,
        position: usize,
    ) -> Result<ObjectGuard<'_, T>, ObjectAccessError> {
        let slot = self
            .objects
            .get(position)
            .ok_or_else(|| ObjectAccessError::Unbound(format!("#{position}")))?;
        self.borrow_slot(slot)
    }

    /// Mutably borrows the declared object `name` as `T`.
    pub fn object_mut<T: Any + Send + Sync>(
        &mut self,
        name: &str,
    ) -> Result<ObjectGuardMut<'_, T>, ObjectAccessError> {
        let slot = self.slot(name)?;
        match &slot.object {
            Some(object) => object.write::<T>().map(ObjectGuardMut::Managed),
            None => self
                .parameter
                .as_deref_mut()
                .and_then(|parameter| parameter.downcast_mut::<T>())
                .map(ObjectGuardMut::Parameter)
                .ok_or_else(|| ObjectAccessError::TypeMismatch {
                    name: name.to_string(),
                    expected: core::any::type_name::<T>(),
                }),
        }
    }

    /// The parameter, if it is a `T`.
    #[must_use]
    pub fn parameter<T: Any>(&self) -> Option<&T> {
        self.parameter
            .as_deref()
            .and_then(|parameter| parameter.downcast_ref::<T>())
    }

    /// Takes the parameter out, if it is a `T`.
    pub fn take_parameter<T: Any>(&mut self) -> Option<T> {
        if !self.parameter.as_deref().is_some_and(|parameter| parameter.is::<T>()) {
            return None;
        }
        self.parameter
            .take()
            .and_then(|parameter| parameter.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Sets the parameter handed to the configured next function.
    pub fn set_result<T: Any + Send>(&mut self, value: T) {
        self.outcome.result = Some(ResultParameter(Box::new(value)));
    }

    /// Instigates a flow without a parameter.
    pub fn do_flow(&mut self, function: impl Into<String>, kind: FlowKind) {
        self.push_flow(function.into(), kind, None, None);
    }

    /// Instigates a flow with a parameter.
    pub fn do_flow_with<P: Any + Send>(
        &mut self,
        function: impl Into<String>,
        kind: FlowKind,
        parameter: P,
    ) {
        self.push_flow(function.into(), kind, Some(Box::new(parameter)), None);
    }

    /// Instigates a flow and registers a callback for its completion.
    pub fn do_flow_with_callback(
        &mut self,
        function: impl Into<String>,
        kind: FlowKind,
        parameter: Option<Parameter>,
        callback: impl FnOnce(Option<Escalation>) + Send + 'static,
    ) {
        self.push_flow(function.into(), kind, parameter, Some(Box::new(callback)));
    }

    /// Requests another execution pass of this function.
    pub fn mark_not_complete(&mut self) {
        self.outcome.not_complete = true;
    }

    /// Finishes the pass, returning what it produced.
    #[must_use]
    pub fn into_outcome(self) -> FunctionOutcome {
        self.outcome
    }

    fn push_flow(
        &mut self,
        function: String,
        kind: FlowKind,
        parameter: Option<Parameter>,
        callback: Option<FlowCallback>,
    ) {
        self.outcome.flows.push(FlowRequest {
            function,
            kind,
            parameter,
            callback,
        });
    }

    fn slot(&self, name: &str) -> Result<&'a ObjectSlot, ObjectAccessError> {
        self.objects
            .iter()
            .find(|slot| slot.name == name)
            .ok_or_else(|| ObjectAccessError::Unbound(name.to_string()))
    }

    fn borrow_slot<T: Any + Send + Sync>(
        &self,
        slot: &'a ObjectSlot,
    ) -> Result<ObjectGuard<'_, T>, ObjectAccessError> {
        match &slot.object {
            Some(object) => object.read::<T>().map(ObjectGuard::Managed),
            None => self
                .parameter
                .as_deref()
                .and_then(|parameter| parameter.downcast_ref::<T>())
                .map(ObjectGuard::Parameter)
                .ok_or_else(|| ObjectAccessError::TypeMismatch {
                    name: slot.name.clone(),
                    expected: core::any::type_name::<T>(),
                }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FunctionMetaData
// ─────────────────────────────────────────────────────────────────────────────

/// Position of a function in its office.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) usize);

impl FunctionId {
    /// Returns the raw index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function_{}", self.0)
    }
}

/// A declared function object and how it is bound.
#[derive(Debug, Clone)]
pub struct FunctionObject {
    /// Declared name.
    pub name: String,
    /// Resolved binding.
    pub binding: ObjectBinding,
}

/// Immutable, validated description of a function.
///
/// Built once by the office builder and shared by every invocation.
pub struct FunctionMetaData {
    pub(crate) id: Option<FunctionId>,
    pub(crate) name: String,
    pub(crate) factory: FunctionFactory,
    pub(crate) parameter: Option<TypeInfo>,
    pub(crate) objects: Vec<FunctionObject>,
    pub(crate) required: Vec<ManagedObjectIndex>,
    pub(crate) required_governance: Option<BitVec>,
    pub(crate) pre_administration: Vec<AdministrationMetaData>,
    pub(crate) post_administration: Vec<AdministrationMetaData>,
    pub(crate) escalation_procedure: EscalationProcedure<FunctionId>,
    pub(crate) next: Option<FunctionId>,
    pub(crate) team: Option<TeamId>,
    pub(crate) async_timeout: Duration,
}

impl FunctionMetaData {
    /// Metadata for a function that handles escalations outside any office
    /// procedure, such as the office or invocation handler.
    ///
    /// It declares no objects and requires every governance inactive.
    pub fn escalation_handler(
        name: impl Into<String>,
        handler: EscalationHandler,
        governance_count: usize,
        manual_governance: bool,
        async_timeout: Duration,
    ) -> Self {
        let factory: FunctionFactory = Arc::new(move || -> Box<dyn ManagedFunction> {
            let handler = Arc::clone(&handler);
            Box::new(from_fn(move |ctx: &mut FunctionContext<'_>| {
                let escalation = ctx
                    .parameter::<Escalation>()
                    .cloned()
                    .unwrap_or_else(|| Escalation::msg("escalation handler invoked without escalation"));
                handler(&escalation)
            }))
        });

        Self {
            id: None,
            name: name.into(),
            factory,
            parameter: Some(TypeInfo::of::<Escalation>()),
            objects: Vec::new(),
            required: Vec::new(),
            required_governance: (!manual_governance).then(|| BitVec::repeat(false, governance_count)),
            pre_administration: Vec::new(),
            post_administration: Vec::new(),
            escalation_procedure: EscalationProcedure::new(),
            next: None,
            team: None,
            async_timeout,
        }
    }

    /// Position in the office, absent for handler metadata built outside it.
    #[must_use]
    pub fn id(&self) -> Option<FunctionId> {
        self.id
    }

    /// Function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a runnable instance.
    #[must_use]
    pub fn create(&self) -> Box<dyn ManagedFunction> {
        (self.factory)()
    }

    /// Declared parameter type.
    #[must_use]
    pub fn parameter_type(&self) -> Option<TypeInfo> {
        self.parameter
    }

    /// Declared objects with their bindings.
    #[must_use]
    pub fn objects(&self) -> &[FunctionObject] {
        &self.objects
    }

    /// Every managed object that must be ready before execution, dependencies
    /// first.
    #[must_use]
    pub fn required_objects(&self) -> &[ManagedObjectIndex] {
        &self.required
    }

    /// Governance requirement, one bit per office governance. `None` when
    /// governance is managed manually.
    #[must_use]
    pub fn required_governance(&self) -> Option<&BitVec> {
        self.required_governance.as_ref()
    }

    /// Duties run before the first execution pass.
    #[must_use]
    pub fn pre_administration(&self) -> &[AdministrationMetaData] {
        &self.pre_administration
    }

    /// Duties run after the completing execution pass.
    #[must_use]
    pub fn post_administration(&self) -> &[AdministrationMetaData] {
        &self.post_administration
    }

    /// The function's own escalation procedure.
    #[must_use]
    pub fn escalation_procedure(&self) -> &EscalationProcedure<FunctionId> {
        &self.escalation_procedure
    }

    /// The statically configured next function.
    #[must_use]
    pub fn next(&self) -> Option<FunctionId> {
        self.next
    }

    /// Team responsible for executing the function, `None` for any team.
    #[must_use]
    pub fn team(&self) -> Option<TeamId> {
        self.team
    }

    /// Timeout for asynchronous operations the function waits on.
    #[must_use]
    pub fn async_timeout(&self) -> Duration {
        self.async_timeout
    }

    /// Returns `true` if objects must be loaded or governance aligned before
    /// the function may execute.
    #[must_use]
    pub fn requires_preparation(&self) -> bool {
        !self.required.is_empty()
            || self
                .required_governance
                .as_ref()
                .is_some_and(|governance| !governance.is_empty())
    }

    /// Checks that `parameter` is acceptable for this function.
    pub fn accepts(&self, parameter: Option<&Parameter>) -> bool {
        match (self.parameter, parameter) {
            (Some(expected), Some(parameter)) => (**parameter).type_id() == expected.id(),
            _ => true,
        }
    }
}

impl fmt::Debug for FunctionMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionMetaData")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("next", &self.next)
            .field("team", &self.team)
            .finish_non_exhaustive()
    }
}
