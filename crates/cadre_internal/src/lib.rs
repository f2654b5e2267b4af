//! # Cadre Internal Library
//!
//! Re-exports the core Cadre crates for convenience.

/// Layer 1: metadata, dependency resolution and managed resources.
pub use cadre_core;

/// Layer 2: execution nodes, scheduling and escalation routing.
pub use cadre_execution;

/// Tracing subscriber setup.
#[cfg(feature = "tracing-setup")]
pub use cadre_tracing;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use cadre_core::prelude::*;
    pub use cadre_execution::prelude::*;
    #[cfg(feature = "tracing-setup")]
    pub use cadre_tracing::{TracingFormat, TracingSetup};
}
