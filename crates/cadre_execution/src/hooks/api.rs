//! Hook registration API for execution events.
//!
//! The [`ExecutionHooks`] registry lets callers observe what the engine does
//! without influencing it. Use it for logging, metrics and test assertions.
//!
//! # Example
//!
//! ```
//! use cadre_execution::hooks::{ExecutionEvent, ExecutionHooks};
//!
//! let hooks = ExecutionHooks::new();
//! hooks
//!     .register_observer("logger", |event: &ExecutionEvent| {
//!         if let ExecutionEvent::FunctionStart { function, .. } = event {
//!             tracing::info!(function = %function, "function starting");
//!         }
//!     })
//!     .unwrap();
//! assert_eq!(hooks.hook_count(), 1);
//! ```

use core::fmt;

use parking_lot::RwLock;

use super::events::ExecutionEvent;

// ─────────────────────────────────────────────────────────────────────────────
// HookRegistrationError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during hook registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookRegistrationError {
    /// A hook with this name is already registered.
    #[error("hook '{name}' already registered")]
    DuplicateName {
        /// The duplicate hook name.
        name: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// HookEntry
// ─────────────────────────────────────────────────────────────────────────────

/// Entry in the hook registry.
struct HookEntry {
    /// Human-readable name for debugging and removal.
    name: String,
    /// The observer.
    hook: Box<dyn Fn(&ExecutionEvent) + Send + Sync>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionHooks
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of execution observers.
///
/// # Thread Safety
///
/// Registration and emission go through a [`RwLock`], so observers may be
/// added while processes run. Observers are invoked on whichever thread emits
/// the event, in registration order, and must not block.
#[derive(Default)]
pub struct ExecutionHooks {
    hooks: RwLock<Vec<HookEntry>>,
}

impl ExecutionHooks {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer under a unique name.
    pub fn register_observer<F>(
        &self,
        name: impl Into<String>,
        hook: F,
    ) -> Result<&Self, HookRegistrationError>
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        let name = name.into();
        let mut hooks = self.hooks.write();

        if hooks.iter().any(|entry| entry.name == name) {
            return Err(HookRegistrationError::DuplicateName { name });
        }

        hooks.push(HookEntry {
            name,
            hook: Box::new(hook),
        });
        Ok(self)
    }

    /// Removes the observer registered as `name`. Returns `true` if found.
    pub fn unregister(&self, name: &str) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|entry| entry.name != name);
        hooks.len() != before
    }

    /// Invokes every observer with `event`.
    pub fn emit(&self, event: &ExecutionEvent) {
        let hooks = self.hooks.read();
        for entry in hooks.iter() {
            (entry.hook)(event);
        }
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Checks if an observer with the given name exists.
    #[must_use]
    pub fn contains_hook(&self, name: &str) -> bool {
        self.hooks.read().iter().any(|entry| entry.name == name)
    }
}

impl fmt::Debug for ExecutionHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read();
        f.debug_list()
            .entries(hooks.iter().map(|entry| &entry.name))
            .finish()
    }
}
