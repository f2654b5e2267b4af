//! Metadata, dependency resolution and managed resources for Cadre (Layer 1).
//!
//! `cadre_core` describes an office: the functions it can run, the managed
//! objects they use, the governances overseeing those objects, the teams that
//! execute work and how escalations are handled. It knows nothing about
//! scheduling; that is `cadre_execution`'s job.
//!
//! # Core Concepts
//!
//! - [`office::OfficeBuilder`] - Collects configuration and validates it
//! - [`function::FunctionMetaData`] - Immutable description of one function
//! - [`resolver::ObjectRegistry`] - Binds and orders function objects
//! - [`object::ManagedObjectContainer`] - Lifecycle of one managed object
//! - [`escalation::Escalation`] - Failures travelling through the engine
//!
//! # Architecture
//!
//! - **Layer 1** (`cadre_core`): metadata and resources (this crate)
//! - **Layer 2** (`cadre_execution`): nodes, thread states and teams

/// Pre and post administration duties.
pub mod administration;

/// Office-wide settings.
pub mod config;

/// Escalations and escalation procedures.
pub mod escalation;

/// Functions and their execution context.
pub mod function;

/// Governance of managed objects.
pub mod governance;

/// Managed object addressing and type identity.
pub mod index;

/// Configuration issues.
pub mod issues;

/// Managed objects and containers.
pub mod object;

/// Office builder and metadata graph.
pub mod office;

/// Asynchronous operations and timeouts.
pub mod operation;

/// Dependency resolution.
pub mod resolver;

/// Teams and jobs.
pub mod team;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::administration::{
        Administration, AdministrationContext, AdministrationPhase, administration_fn,
    };
    pub use crate::config::OfficeConfig;
    pub use crate::escalation::{
        Escalation, EscalationLevel, EscalationMatcher, EscalationProcedure, ExecutionError,
    };
    pub use crate::function::{
        EscalationHandler, FlowKind, FunctionContext, FunctionId, FunctionMetaData,
        ManagedFunction, Parameter, from_fn,
    };
    pub use crate::governance::{DeactivationStrategy, Governance};
    pub use crate::index::{ManagedObjectIndex, ManagedObjectScope, ObjectBinding, TypeInfo};
    pub use crate::issues::{AssetKind, ConfigurationIssue};
    pub use crate::object::{
        Dependencies, ManagedObject, ManagedObjectSource, ManagedObjectUser, ObjectAccessError,
        ObjectRef, source_fn,
    };
    pub use crate::office::{OfficeBuilder, OfficeMetaData};
    pub use crate::operation::{AsyncOperation, Progress};
    pub use crate::team::{CapacityWaker, Job, Team, TeamId, TeamOverloaded};
}

pub use escalation::Escalation;
pub use office::{OfficeBuilder, OfficeMetaData};
