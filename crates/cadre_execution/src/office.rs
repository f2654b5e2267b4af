//! The runtime office: invokes processes over validated metadata.
//!
//! # Example
//!
//! ```
//! use cadre_core::prelude::*;
//! use cadre_execution::office::Office;
//!
//! let mut builder = OfficeBuilder::new(OfficeConfig::default());
//! builder.add_fn("greet", |ctx| {
//!     ctx.set_result(String::from("hello"));
//!     Ok(())
//! })
//! .with_next("reply");
//! builder.add_fn("reply", |_ctx| Ok(())).with_parameter::<String>();
//!
//! let office = Office::new(builder.build());
//! let outcome = office.invoke_process("greet", None).unwrap().wait();
//! assert!(outcome.is_completed());
//! ```

use core::fmt;
use std::sync::{Arc, Weak};

use cadre_core::escalation::Escalation;
use cadre_core::function::{EscalationHandler, FunctionMetaData, Parameter};
use cadre_core::office::OfficeMetaData;
use cadre_core::operation::AsyncMonitor;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::hooks::{ExecutionEvent, ExecutionHooks};
use crate::process::{ProcessHandle, ProcessState};
use crate::thread::ThreadState;

/// Name given to the office level escalation handler function.
pub const OFFICE_HANDLER: &str = "<office-handler>";

/// Name given to the invocation level escalation handler function.
pub const INVOCATION_HANDLER: &str = "<invocation-handler>";

/// Name given to the office floor escalation handler function.
pub const FLOOR_HANDLER: &str = "<office-floor>";

/// Errors invoking a process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    /// No valid function has this name.
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    /// The parameter is not of the function's declared type.
    #[error("function `{function}` expects a `{expected}` parameter")]
    ParameterTypeMismatch {
        /// The invoked function.
        function: String,
        /// The declared parameter type.
        expected: &'static str,
    },
}

/// State shared by every process of an office.
pub(crate) struct OfficeShared {
    pub metadata: OfficeMetaData,
    pub hooks: ExecutionHooks,
    pub monitor: AsyncMonitor,
    pub office_handler: Option<Arc<FunctionMetaData>>,
    pub floor_handler: Option<Arc<FunctionMetaData>>,
}

impl OfficeShared {
    fn handler_function(&self, name: &str, handler: &EscalationHandler) -> Arc<FunctionMetaData> {
        let config = self.metadata.config();
        Arc::new(FunctionMetaData::escalation_handler(
            name,
            Arc::clone(handler),
            self.metadata.governances().len(),
            config.manual_governance(),
            config.default_async_timeout(),
        ))
    }
}

/// A running office.
///
/// Cheap to clone; clones share hooks, the asynchronous monitor and metadata.
#[derive(Clone)]
pub struct Office {
    shared: Arc<OfficeShared>,
}

impl Office {
    /// Creates an office over validated metadata.
    #[must_use]
    pub fn new(metadata: OfficeMetaData) -> Self {
        let mut shared = OfficeShared {
            metadata,
            hooks: ExecutionHooks::new(),
            monitor: AsyncMonitor::new(),
            office_handler: None,
            floor_handler: None,
        };
        let office_handler = shared
            .metadata
            .office_handler()
            .map(|handler| shared.handler_function(OFFICE_HANDLER, handler));
        let floor_handler = shared
            .metadata
            .floor_handler()
            .map(|handler| shared.handler_function(FLOOR_HANDLER, handler));
        shared.office_handler = office_handler;
        shared.floor_handler = floor_handler;

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Observers of this office's execution.
    #[must_use]
    pub fn hooks(&self) -> &ExecutionHooks {
        &self.shared.hooks
    }

    /// The metadata the office runs.
    #[must_use]
    pub fn metadata(&self) -> &OfficeMetaData {
        &self.shared.metadata
    }

    /// Starts a process at `function`.
    ///
    /// With passive teams the process runs on the calling thread before this
    /// returns, unless it suspends on an asynchronous operation.
    pub fn invoke_process(
        &self,
        function: &str,
        parameter: Option<Parameter>,
    ) -> Result<ProcessHandle, InvokeError> {
        self.invoke(function, parameter, None)
    }

    /// Starts a process whose unhandled escalations are offered to `handler`
    /// before the office floor.
    pub fn invoke_process_with_handler(
        &self,
        function: &str,
        parameter: Option<Parameter>,
        handler: impl Fn(&Escalation) -> Result<(), Escalation> + Send + Sync + 'static,
    ) -> Result<ProcessHandle, InvokeError> {
        let handler: EscalationHandler = Arc::new(handler);
        let handler = self.shared.handler_function(INVOCATION_HANDLER, &handler);
        self.invoke(function, parameter, Some(handler))
    }

    fn invoke(
        &self,
        name: &str,
        parameter: Option<Parameter>,
        handler: Option<Arc<FunctionMetaData>>,
    ) -> Result<ProcessHandle, InvokeError> {
        let function = self
            .shared
            .metadata
            .function(name)
            .cloned()
            .ok_or_else(|| InvokeError::UnknownFunction(name.to_string()))?;
        if !function.accepts(parameter.as_ref()) {
            return Err(InvokeError::ParameterTypeMismatch {
                function: name.to_string(),
                expected: function.parameter_type().map_or("()", |info| info.name()),
            });
        }

        let process = ProcessState::new(Arc::clone(&self.shared), handler);
        let handle = process.handle();
        tracing::debug!(process = %process.id, function = name, "invoking process");
        self.shared.hooks.emit(&ExecutionEvent::ProcessStart {
            process: process.id.clone(),
            function: name.to_string(),
        });

        ThreadState::new(process).start(function, parameter);
        Ok(handle)
    }

    /// Fails every asynchronous operation that outlived its timeout. Returns
    /// how many were failed.
    ///
    /// Suspended functions waiting on a failed operation resume on the calling
    /// thread and escalate
    /// [`ExecutionError::AsyncOperationTimedOut`](cadre_core::escalation::ExecutionError::AsyncOperationTimedOut).
    pub fn check_async_operations(&self) -> usize {
        self.shared.monitor.check()
    }

    /// Sweeps asynchronous timeouts every
    /// [`OfficeConfig::monitor_interval`](cadre_core::config::OfficeConfig::monitor_interval)
    /// until the office is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let shared: Weak<OfficeShared> = Arc::downgrade(&self.shared);
        let period = self.shared.metadata.config().monitor_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                // Timed out operations resume their functions inline.
                match tokio::task::spawn_blocking(move || shared.monitor.check()).await {
                    Ok(0) => {}
                    Ok(expired) => tracing::debug!(expired, "asynchronous operations timed out"),
                    Err(error) => tracing::warn!(%error, "asynchronous monitor sweep failed"),
                }
            }
        })
    }
}

impl fmt::Debug for Office {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Office")
            .field("metadata", &self.shared.metadata)
            .field("hooks", &self.shared.hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadre_core::config::OfficeConfig;
    use cadre_core::escalation::ExecutionError;
    use cadre_core::office::OfficeBuilder;

    fn office() -> Office {
        let mut builder = OfficeBuilder::new(OfficeConfig::default());
        builder.add_fn("count", |_| Ok(())).with_parameter::<u32>();
        Office::new(builder.build())
    }

    #[test]
    fn unknown_functions_are_rejected() {
        assert_eq!(
            office().invoke_process("missing", None).unwrap_err(),
            InvokeError::UnknownFunction("missing".into())
        );
    }

    #[test]
    fn parameters_are_type_checked() {
        let error = office()
            .invoke_process("count", Some(Box::new("three")))
            .unwrap_err();
        assert!(matches!(error, InvokeError::ParameterTypeMismatch { .. }));
    }

    #[test]
    fn handler_functions_accept_escalations() {
        let mut builder = OfficeBuilder::new(OfficeConfig::default());
        builder.with_office_handler(|_| Ok(()));
        let office = Office::new(builder.build());

        let handler = office.shared.office_handler.as_ref().unwrap();
        assert_eq!(handler.name(), OFFICE_HANDLER);
        let parameter: Parameter = Box::new(Escalation::from(ExecutionError::ProcessTornDown));
        assert!(handler.accepts(Some(&parameter)));
        assert!(office.shared.floor_handler.is_none());
    }
}
