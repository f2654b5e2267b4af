//! Managed object addressing.
//!
//! Every bound managed object lives in exactly one [`ManagedObjectScope`] and
//! occupies a slot within that scope. The pair forms a [`ManagedObjectIndex`],
//! the key used by the resolver and by every runtime container lookup.

use core::any::{Any, TypeId};
use core::fmt;

/// The lifetime of a managed object.
///
/// Scopes are ordered from shortest to longest lived. A managed object may
/// only depend on objects of an equal or longer lived scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedObjectScope {
    /// Created for, and released with, a single function execution.
    Function,
    /// Shared by every function executing within one thread state.
    Thread,
    /// Shared by every thread state of one process.
    Process,
}

impl ManagedObjectScope {
    /// All scopes, shortest lived first.
    pub const ALL: [ManagedObjectScope; 3] = [Self::Function, Self::Thread, Self::Process];

    /// Returns the ordinal used when ordering indices.
    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Function => 0,
            Self::Thread => 1,
            Self::Process => 2,
        }
    }

    /// Returns `true` if objects in this scope may depend on objects in `other`.
    #[must_use]
    pub fn may_depend_on(self, other: ManagedObjectScope) -> bool {
        other >= self
    }
}

impl fmt::Display for ManagedObjectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Function => "function",
            Self::Thread => "thread",
            Self::Process => "process",
        };
        f.write_str(name)
    }
}

/// Address of a bound managed object: its scope plus its slot in that scope.
///
/// Two indices are equal iff scope and slot match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedObjectIndex {
    scope: ManagedObjectScope,
    slot: usize,
}

impl ManagedObjectIndex {
    /// Creates a new index.
    #[must_use]
    pub fn new(scope: ManagedObjectScope, slot: usize) -> Self {
        Self { scope, slot }
    }

    /// Returns the scope of the indexed object.
    #[must_use]
    pub fn scope(&self) -> ManagedObjectScope {
        self.scope
    }

    /// Returns the slot within the scope.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for ManagedObjectIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scope, self.slot)
    }
}

/// How a declared function object is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectBinding {
    /// Satisfied by the bound managed object at this index.
    Managed(ManagedObjectIndex),
    /// Satisfied by the parameter the function was instigated with.
    Parameter,
}

impl ObjectBinding {
    /// Returns the managed object index, if this is a managed binding.
    #[must_use]
    pub fn index(&self) -> Option<ManagedObjectIndex> {
        match self {
            Self::Managed(index) => Some(*index),
            Self::Parameter => None,
        }
    }
}

/// Runtime type identity paired with a readable name for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    /// Captures the type information of `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`].
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
