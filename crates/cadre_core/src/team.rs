//! Teams: the worker pools that run assigned jobs.

use core::fmt;
use std::sync::Arc;

use crate::escalation::Escalation;

/// Value identity of a registered team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(pub(crate) u32);

impl TeamId {
    /// Creates a team identifier.
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team_{}", self.0)
    }
}

/// Unit of work handed to a team.
pub trait Job: Send + 'static {
    /// Runs the job on the team's worker.
    fn run(self: Box<Self>);

    /// Abandons the job, routing `cause` through escalation handling instead.
    fn cancel(self: Box<Self>, cause: Escalation);
}

/// Rejection returned by an overloaded team. Gives the job back.
#[derive(thiserror::Error)]
#[error("team is overloaded")]
pub struct TeamOverloaded {
    job: Box<dyn Job>,
}

impl TeamOverloaded {
    /// Wraps a rejected job.
    #[must_use]
    pub fn new(job: Box<dyn Job>) -> Self {
        Self { job }
    }

    /// Returns the rejected job.
    #[must_use]
    pub fn into_job(self) -> Box<dyn Job> {
        self.job
    }
}

impl fmt::Debug for TeamOverloaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamOverloaded").finish_non_exhaustive()
    }
}

/// Re-offers a rejected job once its team can take work again.
pub struct CapacityWaker(Box<dyn FnOnce() + Send>);

impl CapacityWaker {
    /// Wraps the re-offer.
    #[must_use]
    pub fn new(wake: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(wake))
    }

    /// Re-offers the job.
    pub fn wake(self) {
        (self.0)();
    }
}

impl fmt::Debug for CapacityWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityWaker").finish_non_exhaustive()
    }
}

/// Worker pool executing jobs.
pub trait Team: Send + Sync + 'static {
    /// Accepts `job` for execution, or rejects it when overloaded.
    fn assign_job(&self, job: Box<dyn Job>) -> Result<(), TeamOverloaded>;

    /// Wakes `waker` once the team may accept work again.
    ///
    /// Teams that cannot tell wake immediately; the rejected job is then
    /// offered again after the work already queued on the assigning thread.
    fn notify_capacity(&self, waker: CapacityWaker) {
        waker.wake();
    }
}

/// A registered team.
#[derive(Clone)]
pub struct TeamMetaData {
    pub(crate) id: TeamId,
    pub(crate) name: String,
    pub(crate) team: Arc<dyn Team>,
}

impl TeamMetaData {
    /// The team's identifier.
    #[must_use]
    pub fn id(&self) -> TeamId {
        self.id
    }

    /// The registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The team itself.
    #[must_use]
    pub fn team(&self) -> &Arc<dyn Team> {
        &self.team
    }
}

impl fmt::Debug for TeamMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamMetaData")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
