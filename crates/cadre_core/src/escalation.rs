//! Escalations: the engine's structured exception handling.
//!
//! Anything that goes wrong while a function is loading, executing or
//! completing is carried as an [`Escalation`]. Escalations are matched against
//! [`EscalationProcedure`]s, ordered tables mapping a cause to a handler.
//!
//! # Matching
//!
//! Procedures are searched in registration order and the first matching entry
//! wins. Registering a broad matcher before a narrow one therefore shadows the
//! narrow one.
//!
//! ```
//! use cadre_core::escalation::{Escalation, EscalationMatcher, EscalationProcedure};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("out of stock")]
//! struct OutOfStock;
//!
//! let mut procedure = EscalationProcedure::new();
//! procedure.push(EscalationMatcher::of::<OutOfStock>(), "restock");
//! procedure.push(EscalationMatcher::any(), "apologise");
//!
//! assert_eq!(procedure.find(&Escalation::new(OutOfStock)), Some(&"restock"));
//! assert_eq!(procedure.find(&Escalation::msg("boom")), Some(&"apologise"));
//! ```

use core::any::TypeId;
use core::error::Error;
use core::fmt;
use core::time::Duration;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Escalation
// ─────────────────────────────────────────────────────────────────────────────

/// A type-erased, cheaply cloneable failure travelling through the engine.
///
/// Any error type converts into an escalation, so function bodies can use `?`
/// on their own error types.
#[derive(Clone)]
pub struct Escalation {
    cause: Arc<dyn Error + Send + Sync + 'static>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Escalation {
    /// Wraps an error as an escalation.
    pub fn new<E>(cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            cause: Arc::new(cause),
            type_id: TypeId::of::<E>(),
            type_name: core::any::type_name::<E>(),
        }
    }

    /// Creates an escalation carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(EscalationMessage(message.into()))
    }

    /// Returns `true` if the cause is of type `E`.
    #[must_use]
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Returns the cause as `E`, if it is one.
    #[must_use]
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.cause.downcast_ref::<E>()
    }

    /// Returns the underlying cause.
    #[must_use]
    pub fn cause(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.cause
    }

    /// Returns the [`TypeId`] of the cause.
    #[must_use]
    pub fn cause_type(&self) -> TypeId {
        self.type_id
    }

    /// Returns the type name of the cause.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl<E> From<E> for Escalation
where
    E: Error + Send + Sync + 'static,
{
    fn from(cause: E) -> Self {
        Self::new(cause)
    }
}

impl fmt::Debug for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escalation")
            .field("type", &self.type_name)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cause, f)
    }
}

/// Cause used by [`Escalation::msg`].
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct EscalationMessage(pub String);

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionError
// ─────────────────────────────────────────────────────────────────────────────

/// Failures raised by the engine itself rather than by user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// An asynchronous operation did not finish within its timeout.
    #[error("asynchronous operation timed out after {timeout:?}")]
    AsyncOperationTimedOut {
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A team kept rejecting a job until its assignment attempts ran out.
    #[error("team `{team}` is overloaded")]
    TeamOverloaded {
        /// Name of the rejecting team.
        team: String,
    },
    /// User code panicked.
    #[error("`{function}` panicked: {message}")]
    FunctionPanicked {
        /// Name of the function, source or administration that panicked.
        function: String,
        /// The panic payload, if it was a string.
        message: String,
    },
    /// A function was instigated with a parameter of the wrong type.
    #[error("function `{function}` expects a `{expected}` parameter")]
    ParameterTypeMismatch {
        /// The instigated function.
        function: String,
        /// The type it declares.
        expected: &'static str,
    },
    /// A flow named a function the office does not know.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// A managed object was used after being released.
    #[error("managed object `{0}` has been released")]
    ObjectReleased(String),
    /// A managed object was coordinated before it was loaded.
    #[error("managed object `{0}` was coordinated before being loaded")]
    ObjectNotLoaded(String),
    /// The owning process was torn down by an unhandled escalation.
    #[error("process was torn down")]
    ProcessTornDown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum MatcherKind {
    Type(TypeId),
    Any,
    Predicate(Arc<dyn Fn(&Escalation) -> bool + Send + Sync>),
}

/// Decides whether an escalation is handled by a procedure entry.
#[derive(Clone)]
pub struct EscalationMatcher {
    description: String,
    kind: MatcherKind,
}

impl EscalationMatcher {
    /// Matches escalations whose cause is exactly `E`.
    #[must_use]
    pub fn of<E: Error + 'static>() -> Self {
        Self {
            description: core::any::type_name::<E>().to_string(),
            kind: MatcherKind::Type(TypeId::of::<E>()),
        }
    }

    /// Matches every escalation.
    #[must_use]
    pub fn any() -> Self {
        Self {
            description: "*".to_string(),
            kind: MatcherKind::Any,
        }
    }

    /// Matches escalations accepted by `predicate`.
    ///
    /// Use this to group several cause types under one handler.
    pub fn when(
        description: impl Into<String>,
        predicate: impl Fn(&Escalation) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            kind: MatcherKind::Predicate(Arc::new(predicate)),
        }
    }

    /// Returns `true` if `escalation` is matched.
    #[must_use]
    pub fn matches(&self, escalation: &Escalation) -> bool {
        match &self.kind {
            MatcherKind::Type(id) => escalation.cause_type() == *id,
            MatcherKind::Any => true,
            MatcherKind::Predicate(predicate) => predicate(escalation),
        }
    }

    /// Returns a readable description of what is matched.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for EscalationMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EscalationMatcher")
            .field(&self.description)
            .finish()
    }
}

/// Ordered cause to handler table.
#[derive(Debug, Clone)]
pub struct EscalationProcedure<T> {
    entries: Vec<(EscalationMatcher, T)>,
}

impl<T> Default for EscalationProcedure<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> EscalationProcedure<T> {
    /// Creates an empty procedure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Earlier entries take precedence.
    pub fn push(&mut self, matcher: EscalationMatcher, target: T) {
        self.entries.push((matcher, target));
    }

    /// Returns the target of the first entry matching `escalation`.
    #[must_use]
    pub fn find(&self, escalation: &Escalation) -> Option<&T> {
        self.entries
            .iter()
            .find(|(matcher, _)| matcher.matches(escalation))
            .map(|(_, target)| target)
    }

    /// Iterates the entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&EscalationMatcher, &T)> {
        self.entries.iter().map(|(matcher, target)| (matcher, target))
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EscalationLevel
// ─────────────────────────────────────────────────────────────────────────────

/// Global levels searched once no node handles an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EscalationLevel {
    /// The office-wide escalation procedure.
    Flow,
    /// The office escalation handler.
    Office,
    /// The handler supplied by the caller that invoked the process.
    InvocationHandler,
    /// The framework-wide last resort.
    OfficeFloor,
}

impl EscalationLevel {
    /// Returns the level searched after this one.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Flow => Some(Self::Office),
            Self::Office => Some(Self::InvocationHandler),
            Self::InvocationHandler => Some(Self::OfficeFloor),
            Self::OfficeFloor => None,
        }
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flow => "flow",
            Self::Office => "office",
            Self::InvocationHandler => "invocation-handler",
            Self::OfficeFloor => "office-floor",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("type error x")]
    struct TypeErrorX;

    #[derive(Debug, thiserror::Error)]
    #[error("other")]
    struct Other;

    #[test]
    fn escalation_downcasts_to_cause() {
        let escalation = Escalation::from(TypeErrorX);
        assert!(escalation.is::<TypeErrorX>());
        assert!(!escalation.is::<Other>());
        assert!(escalation.downcast_ref::<TypeErrorX>().is_some());
        assert_eq!(escalation.to_string(), "type error x");
    }

    #[test]
    fn clones_share_cause() {
        let escalation = Escalation::msg("shared");
        let clone = escalation.clone();
        assert!(clone.is::<EscalationMessage>());
        assert_eq!(clone.to_string(), "shared");
    }

    #[test]
    fn first_registered_match_wins() {
        let mut procedure = EscalationProcedure::new();
        procedure.push(EscalationMatcher::any(), 1);
        procedure.push(EscalationMatcher::of::<TypeErrorX>(), 2);

        assert_eq!(procedure.find(&TypeErrorX.into()), Some(&1));
    }

    #[test]
    fn predicate_matchers_group_causes() {
        let matcher = EscalationMatcher::when("x or other", |e| {
            e.is::<TypeErrorX>() || e.is::<Other>()
        });
        assert!(matcher.matches(&TypeErrorX.into()));
        assert!(matcher.matches(&Other.into()));
        assert!(!matcher.matches(&Escalation::msg("no")));
    }

    #[test]
    fn unmatched_escalations_find_nothing() {
        let mut procedure = EscalationProcedure::new();
        procedure.push(EscalationMatcher::of::<Other>(), "other");
        assert!(procedure.find(&TypeErrorX.into()).is_none());
    }

    #[test]
    fn levels_are_searched_in_order() {
        let mut level = Some(EscalationLevel::Flow);
        let mut visited = Vec::new();
        while let Some(current) = level {
            visited.push(current);
            level = current.next();
        }
        assert_eq!(
            visited,
            vec![
                EscalationLevel::Flow,
                EscalationLevel::Office,
                EscalationLevel::InvocationHandler,
                EscalationLevel::OfficeFloor,
            ]
        );
    }
}
