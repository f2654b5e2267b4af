//! Governance: cross-cutting oversight of managed objects.
//!
//! A governance (a transaction, an audit trail, ...) is activated per thread
//! state when a function requires it, governs the managed objects subject to
//! it, and is deactivated either by enforcing or by disregarding what it
//! collected.

use std::sync::Arc;

use hashbrown::HashSet;

use crate::escalation::Escalation;
use crate::object::ObjectRef;
use crate::operation::{AsyncOperation, Progress};

/// A governance instance, alive from activation until deactivation.
pub trait Governance: Send + 'static {
    /// Called once when the governance becomes active.
    fn activate(&mut self) -> Result<Progress, Escalation> {
        Ok(Progress::Complete)
    }

    /// Brings a managed object under this governance.
    fn govern(&mut self, object: &ObjectRef) -> Result<(), Escalation> {
        let _ = object;
        Ok(())
    }

    /// Applies the outstanding governed work.
    fn enforce(&mut self) -> Result<Progress, Escalation>;

    /// Discards the outstanding governed work.
    fn disregard(&mut self) -> Result<Progress, Escalation> {
        Ok(Progress::Complete)
    }
}

/// How an active governance is deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeactivationStrategy {
    /// Flush outstanding governed work. Used by normal continuations.
    #[default]
    Enforce,
    /// Discard outstanding governed work. Used by escalation handlers.
    Disregard,
}

/// Factory creating governance instances.
pub type GovernanceFactory = Arc<dyn Fn() -> Box<dyn Governance> + Send + Sync>;

/// Immutable description of a governance.
pub struct GovernanceMetaData {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) factory: GovernanceFactory,
}

impl GovernanceMetaData {
    /// Registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in the office governance registry.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl core::fmt::Debug for GovernanceMetaData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GovernanceMetaData")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Activation state of one governance within one thread state.
pub struct GovernanceContainer {
    metadata: Arc<GovernanceMetaData>,
    active: Option<Box<dyn Governance>>,
    transition: Option<AsyncOperation>,
    governed: HashSet<u64>,
}

impl GovernanceContainer {
    /// Creates an inactive container.
    #[must_use]
    pub fn new(metadata: Arc<GovernanceMetaData>) -> Self {
        Self {
            metadata,
            active: None,
            transition: None,
            governed: HashSet::new(),
        }
    }

    /// The governance's metadata.
    #[must_use]
    pub fn metadata(&self) -> &Arc<GovernanceMetaData> {
        &self.metadata
    }

    /// Returns `true` while active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The transition still in flight, if any.
    #[must_use]
    pub fn transition(&self) -> Option<&AsyncOperation> {
        self.transition.as_ref()
    }

    /// Records an in-flight transition.
    pub fn set_transition(&mut self, operation: AsyncOperation) {
        self.transition = Some(operation);
    }

    /// Clears the in-flight transition.
    pub fn clear_transition(&mut self) {
        self.transition = None;
    }

    /// Creates and activates a new governance instance.
    pub fn activate(&mut self) -> Result<Progress, Escalation> {
        let mut governance = (self.metadata.factory)();
        let progress = governance.activate()?;
        self.active = Some(governance);
        self.governed.clear();
        tracing::debug!(governance = %self.metadata.name, "governance activated");
        Ok(progress)
    }

    /// Governs `object` unless already governed by the current activation.
    pub fn govern(&mut self, object: &ObjectRef) -> Result<(), Escalation> {
        let Some(governance) = self.active.as_mut() else {
            return Ok(());
        };
        if !self.governed.insert(object.instance_id()) {
            return Ok(());
        }
        governance.govern(object)
    }

    /// Deactivates the current instance using `strategy`.
    pub fn deactivate(&mut self, strategy: DeactivationStrategy) -> Result<Progress, Escalation> {
        let Some(mut governance) = self.active.take() else {
            return Ok(Progress::Complete);
        };
        self.governed.clear();
        tracing::debug!(
            governance = %self.metadata.name,
            ?strategy,
            "governance deactivated"
        );
        match strategy {
            DeactivationStrategy::Enforce => governance.enforce(),
            DeactivationStrategy::Disregard => governance.disregard(),
        }
    }
}

impl core::fmt::Debug for GovernanceContainer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GovernanceContainer")
            .field("governance", &self.metadata.name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
