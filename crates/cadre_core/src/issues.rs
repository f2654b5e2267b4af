//! Configuration issues.
//!
//! Problems found while building an office are collected rather than raised.
//! Each issue names the asset it concerns; an asset with issues is left out of
//! the built office while its siblings are unaffected.

use crate::index::ManagedObjectScope;

/// Kind of configured asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// A function.
    Function,
    /// A managed object.
    ManagedObject,
    /// A governance.
    Governance,
    /// A team.
    Team,
}

impl core::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Function => "function",
            Self::ManagedObject => "managed object",
            Self::Governance => "governance",
            Self::Team => "team",
        };
        f.write_str(name)
    }
}

/// A problem with the office configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationIssue {
    /// Two assets of one kind share a name.
    #[error("duplicate {kind} `{name}`")]
    DuplicateName {
        /// Kind of the duplicated asset.
        kind: AssetKind,
        /// The duplicated name.
        name: String,
    },
    /// A function references an object that is not bound.
    #[error("function `{function}` references unknown managed object `{object}`")]
    UnknownObject {
        /// The referencing function.
        function: String,
        /// The missing object.
        object: String,
    },
    /// A function references an object that is itself misconfigured.
    #[error("function `{function}` references invalid managed object `{object}`")]
    InvalidObject {
        /// The referencing function.
        function: String,
        /// The invalid object.
        object: String,
    },
    /// A managed object depends on an object that is not bound.
    #[error("managed object `{object}` depends on unknown managed object `{dependency}`")]
    UnknownDependency {
        /// The dependent object.
        object: String,
        /// The missing dependency.
        dependency: String,
    },
    /// A required type does not match the type the object produces.
    #[error("function `{function}` requires `{object}` as `{expected}` but it produces `{actual}`")]
    TypeMismatch {
        /// The requiring function.
        function: String,
        /// The object.
        object: String,
        /// The required type.
        expected: &'static str,
        /// The produced type.
        actual: &'static str,
    },
    /// Two managed objects depend on each other.
    #[error("cyclic dependency between managed objects `{first}` and `{second}`")]
    CyclicDependency {
        /// The function whose dependencies contain the cycle.
        function: String,
        /// Lexicographically first participant.
        first: String,
        /// Lexicographically second participant.
        second: String,
    },
    /// A managed object depends on itself.
    #[error("managed object `{object}` depends on itself")]
    SelfDependency {
        /// The function whose dependencies contain the cycle.
        function: String,
        /// The self dependent object.
        object: String,
    },
    /// A managed object depends on a shorter lived one.
    #[error(
        "{scope} managed object `{object}` cannot depend on {dependency_scope} managed object `{dependency}`"
    )]
    ScopeViolation {
        /// The dependent object.
        object: String,
        /// Its scope.
        scope: ManagedObjectScope,
        /// The dependency.
        dependency: String,
        /// The dependency's scope.
        dependency_scope: ManagedObjectScope,
    },
    /// A function references a function that is not configured.
    #[error("function `{function}` references unknown function `{reference}`")]
    UnknownFunction {
        /// The referencing function.
        function: String,
        /// The missing function.
        reference: String,
    },
    /// A function references a function that is itself misconfigured.
    #[error("function `{function}` references invalid function `{reference}`")]
    InvalidFunction {
        /// The referencing function.
        function: String,
        /// The invalid function.
        reference: String,
    },
    /// A function names a team that is not registered.
    #[error("function `{function}` references unknown team `{team}`")]
    UnknownTeam {
        /// The referencing function.
        function: String,
        /// The missing team.
        team: String,
    },
    /// An asset names a governance that is not registered.
    #[error("{kind} `{asset}` references unknown governance `{governance}`")]
    UnknownGovernance {
        /// Kind of the referencing asset.
        kind: AssetKind,
        /// The referencing asset.
        asset: String,
        /// The missing governance.
        governance: String,
    },
    /// Governance configured on a function while governance is manual.
    #[error("function `{function}` configures governance `{governance}` but governance is managed manually")]
    ManualGovernance {
        /// The function.
        function: String,
        /// The configured governance.
        governance: String,
    },
    /// An escalation handler expects a parameter other than the escalation.
    #[error("function `{handler}` cannot handle escalations as it expects a `{parameter}` parameter")]
    InvalidEscalationHandler {
        /// The handler function.
        handler: String,
        /// The parameter type it declares.
        parameter: &'static str,
    },
}

impl ConfigurationIssue {
    /// Kind of the asset this issue is recorded against.
    #[must_use]
    pub fn asset_kind(&self) -> AssetKind {
        match self {
            Self::DuplicateName { kind, .. } | Self::UnknownGovernance { kind, .. } => *kind,
            Self::UnknownDependency { .. } | Self::ScopeViolation { .. } => AssetKind::ManagedObject,
            _ => AssetKind::Function,
        }
    }

    /// Name of the asset this issue is recorded against.
    #[must_use]
    pub fn asset(&self) -> &str {
        match self {
            Self::DuplicateName { name, .. } => name,
            Self::UnknownDependency { object, .. } | Self::ScopeViolation { object, .. } => object,
            Self::UnknownGovernance { asset, .. } => asset,
            Self::InvalidEscalationHandler { handler, .. } => handler,
            Self::UnknownObject { function, .. }
            | Self::InvalidObject { function, .. }
            | Self::TypeMismatch { function, .. }
            | Self::CyclicDependency { function, .. }
            | Self::SelfDependency { function, .. }
            | Self::UnknownFunction { function, .. }
            | Self::InvalidFunction { function, .. }
            | Self::UnknownTeam { function, .. }
            | Self::ManualGovernance { function, .. } => function,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_dependency_names_object_once() {
        let issue = ConfigurationIssue::SelfDependency {
            function: "F".into(),
            object: "B".into(),
        };
        let message = issue.to_string();
        assert_eq!(message.matches('B').count(), 1);
        assert_eq!(issue.asset(), "F");
    }

    #[test]
    fn object_issues_are_recorded_against_objects() {
        let issue = ConfigurationIssue::UnknownDependency {
            object: "cart".into(),
            dependency: "inventory".into(),
        };
        assert_eq!(issue.asset_kind(), AssetKind::ManagedObject);
        assert_eq!(issue.asset(), "cart");
    }
}
