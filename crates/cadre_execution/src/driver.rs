//! The per OS thread work driver.
//!
//! Every continuation of the engine (running a thread state, offering a node
//! to a team) is submitted here. The first submission on an OS thread runs a
//! drain loop; submissions made while that loop is active, for instance by a
//! function completing an asynchronous operation or by a passive team running
//! its job inline, are queued to it instead of recursing.

use core::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use cadre_core::escalation::{Escalation, ExecutionError};
use cadre_core::team::{CapacityWaker, Job, TeamId, TeamMetaData};

use crate::hooks::ExecutionEvent;
use crate::node::NodeId;
use crate::thread::{Activation, ThreadState};

/// A unit of engine work.
pub(crate) enum Work {
    /// Run a thread state's pending activations.
    Run {
        thread: Arc<ThreadState>,
        executor: Option<TeamId>,
        first: Option<Activation>,
    },
    /// Offer a node to its responsible team.
    Assign {
        job: Box<dyn Job>,
        thread: Arc<ThreadState>,
        function: String,
        team: Arc<TeamMetaData>,
        attempts: usize,
    },
}

thread_local! {
    static QUEUE: RefCell<Option<VecDeque<Work>>> = const { RefCell::new(None) };
}

/// Clears the queue when the drain loop exits, even by unwinding.
struct DriverGuard;

impl Drop for DriverGuard {
    fn drop(&mut self) {
        QUEUE.with(|queue| *queue.borrow_mut() = None);
    }
}

/// Performs `work`, or queues it if this OS thread is already driving.
pub(crate) fn submit(work: Work) {
    let mut work = Some(work);
    let driving = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.extend(work.take());
                true
            }
            None => {
                *queue = Some(VecDeque::new());
                false
            }
        }
    });
    if driving {
        return;
    }

    let _guard = DriverGuard;
    while let Some(current) = work.take() {
        perform(current);
        work = QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front));
    }
}

fn perform(work: Work) {
    match work {
        Work::Run {
            thread,
            executor,
            first,
        } => thread.run(executor, first),
        Work::Assign {
            job,
            thread,
            function,
            team,
            attempts,
        } => assign(job, thread, function, team, attempts),
    }
}

fn assign(
    job: Box<dyn Job>,
    thread: Arc<ThreadState>,
    function: String,
    team: Arc<TeamMetaData>,
    attempts: usize,
) {
    let hooks = &thread.process.office.hooks;
    match team.team().assign_job(job) {
        Ok(()) => {
            tracing::trace!(function = %function, team = team.name(), "node handed to team");
            hooks.emit(&ExecutionEvent::TeamHandoff {
                process: thread.process.id.clone(),
                function,
                team: team.name().to_string(),
            });
        }
        Err(rejected) => {
            let attempt = attempts + 1;
            tracing::debug!(function = %function, team = team.name(), attempt, "team overloaded");
            hooks.emit(&ExecutionEvent::TeamOverloaded {
                process: thread.process.id.clone(),
                function: function.clone(),
                team: team.name().to_string(),
                attempt,
            });

            let limit = thread.process.office.metadata.config().max_team_assignment_attempts();
            let job = rejected.into_job();
            if limit.is_some_and(|max| attempt >= max) {
                tracing::warn!(function = %function, team = team.name(), attempt, "giving up on overloaded team");
                job.cancel(
                    ExecutionError::TeamOverloaded {
                        team: team.name().to_string(),
                    }
                    .into(),
                );
                return;
            }

            // Parked until the team has room; other queued work runs first.
            let waiting = Arc::clone(&team);
            waiting.team().notify_capacity(CapacityWaker::new(move || {
                submit(Work::Assign {
                    job,
                    thread,
                    function,
                    team,
                    attempts: attempt,
                });
            }));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ThreadJob
// ─────────────────────────────────────────────────────────────────────────────

/// Job continuing a thread state at one node on a team's worker.
pub(crate) struct ThreadJob {
    pub thread: Arc<ThreadState>,
    pub node: NodeId,
    pub team: TeamId,
}

impl Job for ThreadJob {
    fn run(self: Box<Self>) {
        let Self { thread, node, team } = *self;
        submit(Work::Run {
            thread,
            executor: Some(team),
            first: Some(Activation::Run(node)),
        });
    }

    fn cancel(self: Box<Self>, cause: Escalation) {
        let Self { thread, node, .. } = *self;
        thread.inject_failure(node, cause);
        submit(Work::Run {
            thread,
            executor: None,
            first: Some(Activation::Run(node)),
        });
    }
}
