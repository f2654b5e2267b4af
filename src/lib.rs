//! A cooperative execution engine.
//!
//! Chains of small functions run across teams of workers while Cadre
//! resolves their managed objects, applies governance and routes
//! escalations to the nearest handler.
//!

pub use cadre_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use cadre_internal::prelude::*;
}
