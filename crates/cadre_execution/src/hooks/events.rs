//! Unified event enum for execution hooks.
//!
//! All observers receive `&ExecutionEvent` and match on the variants they care
//! about.
//!
//! # Example
//!
//! ```
//! use cadre_execution::hooks::ExecutionEvent;
//!
//! fn handle_event(event: &ExecutionEvent) {
//!     match event {
//!         ExecutionEvent::FunctionStart { function, .. } => {
//!             println!("{function} starting");
//!         }
//!         ExecutionEvent::Escalated { function, handler, .. } => {
//!             println!("{function} escalated to {handler:?}");
//!         }
//!         _ => {}
//!     }
//! }
//! ```

use cadre_core::escalation::EscalationLevel;

use crate::process::ProcessId;

/// Unified event enum for all execution hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    // ─────────────────────────────────────────────────────────────────────────
    // Process Events
    // ─────────────────────────────────────────────────────────────────────────
    /// A process was invoked.
    ProcessStart {
        /// The new process.
        process: ProcessId,
        /// The function the process starts with.
        function: String,
    },

    /// Every thread state of a process finished, or the process was torn down.
    ProcessComplete {
        /// The finished process.
        process: ProcessId,
        /// Whether the process was torn down by an unhandled escalation.
        failed: bool,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Function Events
    // ─────────────────────────────────────────────────────────────────────────
    /// A node took its first step.
    FunctionStart {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
    },

    /// One execution pass of a function finished.
    FunctionExecuted {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
        /// Pass number, starting at one.
        pass: usize,
    },

    /// A function reported completion and its continuation was decided.
    CompletionHandled {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
    },

    /// A node was unlinked after completing.
    FunctionComplete {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
    },

    /// A node suspended on an asynchronous operation.
    FunctionSuspended {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
    },

    /// A node was unlinked without completing, while escalating.
    FunctionCleared {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduling Events
    // ─────────────────────────────────────────────────────────────────────────
    /// A thread state switched to protected execution.
    ProtectionEngaged {
        /// Owning process.
        process: ProcessId,
        /// Function whose node required protection.
        function: String,
    },

    /// A node was handed to its responsible team.
    TeamHandoff {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
        /// Team name.
        team: String,
    },

    /// A team rejected a node.
    TeamOverloaded {
        /// Owning process.
        process: ProcessId,
        /// Function name.
        function: String,
        /// Team name.
        team: String,
        /// Number of the rejected attempt, starting at one.
        attempt: usize,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Escalation Events
    // ─────────────────────────────────────────────────────────────────────────
    /// An escalation was routed.
    Escalated {
        /// Owning process.
        process: ProcessId,
        /// Function that escalated.
        function: String,
        /// Display form of the cause.
        cause: String,
        /// Handler function chosen, if any.
        handler: Option<String>,
        /// Global level that handled it, `None` for node handlers.
        level: Option<EscalationLevel>,
    },
}

impl ExecutionEvent {
    /// The process the event belongs to.
    #[must_use]
    pub fn process(&self) -> &ProcessId {
        match self {
            Self::ProcessStart { process, .. }
            | Self::ProcessComplete { process, .. }
            | Self::FunctionStart { process, .. }
            | Self::FunctionExecuted { process, .. }
            | Self::CompletionHandled { process, .. }
            | Self::FunctionComplete { process, .. }
            | Self::FunctionSuspended { process, .. }
            | Self::FunctionCleared { process, .. }
            | Self::ProtectionEngaged { process, .. }
            | Self::TeamHandoff { process, .. }
            | Self::TeamOverloaded { process, .. }
            | Self::Escalated { process, .. } => process,
        }
    }
}
