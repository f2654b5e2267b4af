//! Lifecycle hooks for process execution.
//!
//! Observers registered on an office's [`ExecutionHooks`] receive an
//! [`ExecutionEvent`] for every notable step: process start and completion,
//! each function pass, suspensions, team hand-offs and escalations.
//!
//! # Design Principles
//!
//! - Observers execute in registration order
//! - Observers see events, they never alter scheduling
//! - Primary use case: tracing, metrics, debugging and tests

pub mod api;
pub mod events;

pub use api::{ExecutionHooks, HookRegistrationError};
pub use events::ExecutionEvent;
