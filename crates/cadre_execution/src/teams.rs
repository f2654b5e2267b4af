//! Ready made [`Team`] implementations.

use core::mem;
use std::sync::Arc;

use cadre_core::team::{CapacityWaker, Job, Team, TeamOverloaded};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Runs every job on the assigning thread.
///
/// Work is queued behind whatever the thread is already driving, so a passive
/// team never recurses into the engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassiveTeam;

impl Team for PassiveTeam {
    fn assign_job(&self, job: Box<dyn Job>) -> Result<(), TeamOverloaded> {
        job.run();
        Ok(())
    }
}

/// Runs jobs on tokio's blocking pool, at most `workers` at a time.
///
/// A job assigned while every worker is busy is rejected with
/// [`TeamOverloaded`]. Capacity wakers registered meanwhile are woken as each
/// worker frees up.
#[derive(Debug, Clone)]
pub struct WorkerTeam {
    handle: Handle,
    permits: Arc<Semaphore>,
    waiting: Arc<Mutex<Vec<CapacityWaker>>>,
}

impl WorkerTeam {
    /// Creates a team on the runtime behind `handle`.
    #[must_use]
    pub fn new(handle: Handle, workers: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            waiting: Arc::default(),
        }
    }

    /// Creates a team on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn current(workers: usize) -> Self {
        Self::new(Handle::current(), workers)
    }

    /// Workers currently idle.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Team for WorkerTeam {
    fn assign_job(&self, job: Box<dyn Job>) -> Result<(), TeamOverloaded> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return Err(TeamOverloaded::new(job));
        };
        let waiting = Arc::clone(&self.waiting);
        self.handle.spawn_blocking(move || {
            job.run();
            drop(permit);
            wake_waiting(&waiting);
        });
        Ok(())
    }

    fn notify_capacity(&self, waker: CapacityWaker) {
        self.waiting.lock().push(waker);
        // A worker may have finished between the rejection and the push.
        if self.permits.available_permits() > 0 {
            wake_waiting(&self.waiting);
        }
    }
}

fn wake_waiting(waiting: &Mutex<Vec<CapacityWaker>>) {
    let wakers = mem::take(&mut *waiting.lock());
    for waker in wakers {
        waker.wake();
    }
}
