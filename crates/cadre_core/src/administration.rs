//! Pre and post administration of functions.
//!
//! Administration duties run around a function's execution with access to a
//! set of managed objects: before the first execution pass, and after the
//! pass that completes the function.

use core::fmt;
use std::sync::Arc;

use crate::escalation::Escalation;
use crate::index::ManagedObjectIndex;
use crate::object::ObjectRef;

/// When an administration duty runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdministrationPhase {
    /// Before the function first executes.
    Pre,
    /// After the function completes.
    Post,
}

/// What an administration duty sees.
pub struct AdministrationContext<'a> {
    function: &'a str,
    phase: AdministrationPhase,
    objects: &'a [ObjectRef],
}

impl<'a> AdministrationContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(function: &'a str, phase: AdministrationPhase, objects: &'a [ObjectRef]) -> Self {
        Self {
            function,
            phase,
            objects,
        }
    }

    /// Name of the administered function.
    #[must_use]
    pub fn function(&self) -> &str {
        self.function
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> AdministrationPhase {
        self.phase
    }

    /// The administered objects, in declaration order.
    #[must_use]
    pub fn objects(&self) -> &[ObjectRef] {
        self.objects
    }

    /// Looks an administered object up by name.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<&ObjectRef> {
        self.objects.iter().find(|object| object.name() == name)
    }
}

/// An administration duty.
pub trait Administration: Send + 'static {
    /// Performs the duty.
    fn administer(&mut self, context: &AdministrationContext<'_>) -> Result<(), Escalation>;
}

/// Administration built from a closure. See [`administration_fn`].
pub struct FnAdministration<F>(F);

/// Wraps a closure as an [`Administration`].
pub fn administration_fn<F>(f: F) -> FnAdministration<F>
where
    F: FnMut(&AdministrationContext<'_>) -> Result<(), Escalation> + Send + 'static,
{
    FnAdministration(f)
}

impl<F> Administration for FnAdministration<F>
where
    F: FnMut(&AdministrationContext<'_>) -> Result<(), Escalation> + Send + 'static,
{
    fn administer(&mut self, context: &AdministrationContext<'_>) -> Result<(), Escalation> {
        (self.0)(context)
    }
}

/// Factory creating administration duties.
pub type AdministrationFactory = Arc<dyn Fn() -> Box<dyn Administration> + Send + Sync>;

/// Immutable description of one administration duty.
#[derive(Clone)]
pub struct AdministrationMetaData {
    pub(crate) name: String,
    pub(crate) factory: AdministrationFactory,
    pub(crate) objects: Vec<ManagedObjectIndex>,
}

impl AdministrationMetaData {
    /// Name of the duty.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates an instance of the duty.
    #[must_use]
    pub fn create(&self) -> Box<dyn Administration> {
        (self.factory)()
    }

    /// Indices of the administered objects.
    #[must_use]
    pub fn objects(&self) -> &[ManagedObjectIndex] {
        &self.objects
    }
}

impl fmt::Debug for AdministrationMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdministrationMetaData")
            .field("name", &self.name)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}
