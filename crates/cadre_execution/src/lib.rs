//! Execution nodes, thread states, teams and escalation routing for Cadre (Layer 2).
//!
//! `cadre_execution` runs the metadata built by `cadre_core`. Invoking a
//! function starts a process; each process runs one or more thread states,
//! and each thread state drives a tree of execution nodes through their
//! lifecycle:
//!
//! ```text
//! load ─► govern ─► coordinate ─► execute ─► handle-completion ─► activate-next
//!                                   ▲   │
//!                                   └───┘ not complete
//! ```
//!
//! # Core Concepts
//!
//! - [`office::Office`] - Invokes processes and sweeps asynchronous timeouts
//! - [`process::ProcessHandle`] - Waits on a process outcome
//! - [`hooks::ExecutionHooks`] - Observers of execution events
//! - [`teams`] - Passive and tokio backed teams
//!
//! # Example
//!
//! ```
//! use cadre_core::prelude::*;
//! use cadre_execution::prelude::*;
//!
//! let mut builder = OfficeBuilder::new(OfficeConfig::default());
//! builder.add_fn("tick", |ctx| {
//!     ctx.do_flow("tock", FlowKind::Parallel);
//!     Ok(())
//! });
//! builder.add_fn("tock", |_| Ok(()));
//!
//! let office = Office::new(builder.build());
//! office
//!     .hooks()
//!     .register_observer("log", |event| tracing::info!(?event, "execution event"))
//!     .unwrap();
//!
//! let outcome = office.invoke_process("tick", None).unwrap().wait();
//! assert!(outcome.is_completed());
//! ```

pub(crate) mod driver;
mod escalation;

/// Execution observers.
pub mod hooks;

/// Execution nodes and their arena.
pub mod node;

/// The runtime office.
pub mod office;

/// Processes and their handles.
pub mod process;

/// Team implementations.
pub mod teams;

pub(crate) mod thread;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::hooks::{ExecutionEvent, ExecutionHooks, HookRegistrationError};
    pub use crate::node::FunctionState;
    pub use crate::office::{InvokeError, Office};
    pub use crate::process::{ProcessHandle, ProcessId, ProcessOutcome};
    pub use crate::teams::{PassiveTeam, WorkerTeam};
}

pub use office::Office;
