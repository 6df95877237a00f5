//! Units of per-tick work and the types that describe their failures.
//!
//! A [`Task`] is opaque domain logic (erosion, rainfall, tectonics). The
//! engine only knows its four hooks and its name. Tasks reach cells through
//! the shared [`Surface`] and learn where and when they are running from
//! the [`TickContext`].
//!
//! Tasks take `&self`. A task registered once is shared by every worker and
//! must synchronize its own state; a task built by a [`TaskFactory`] belongs
//! to exactly one worker and never sees another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use strata_grid::{CellError, Region};

use crate::surface::Surface;
use crate::worker::WorkerId;

/// Error returned by a task hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A cell operation failed (starvation, cancellation, ownership).
    #[error(transparent)]
    Cell(#[from] CellError),

    /// Domain-level failure reported by the task itself.
    #[error("{message}")]
    Failed {
        /// Description of what went wrong.
        message: String,
    },
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// What went wrong inside a faulting task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultCause {
    /// A hook returned an error.
    #[error(transparent)]
    Error(#[from] TaskError),

    /// A hook panicked; the payload message is kept when it was a string.
    #[error("panicked: {0}")]
    Panic(String),
}

/// A task failure tagged with where it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{worker} task `{task}` faulted on tick {tick}: {cause}")]
pub struct TaskFault {
    /// The worker running the task.
    pub worker: WorkerId,
    /// Name of the faulting task.
    pub task: String,
    /// The worker's own tick counter when the fault happened.
    pub tick: u64,
    /// The underlying failure.
    pub cause: FaultCause,
}

/// How a worker reacts to a [`TaskFault`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Stop the worker at the first fault and report it on shutdown.
    FailFast,
    /// Log the fault, skip the rest of that task for the tick, keep going.
    #[default]
    Resilient,
}

/// Where and when a task is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    /// The worker running the task.
    pub worker: WorkerId,
    /// The worker's own tick counter, starting at 1 for the first tick.
    pub worker_tick: u64,
    /// Coordinator tick at the start of this worker tick.
    pub sim_tick: u64,
    /// Simulated planet age in years at the start of this worker tick.
    pub planet_age: u64,
    /// The worker's region.
    pub region: Region,
}

/// Per-tick work over a worker's region.
///
/// For every worker tick the hooks run as `check`, then (only if `check`
/// returned true) `before`, `perform` for each cell of the region with rows
/// outermost, and `after`.
pub trait Task<T>: Send + Sync {
    /// Name used in logs and fault reports.
    fn name(&self) -> &str;

    /// Decide whether the task runs this tick. Called exactly once per tick.
    fn check(&self, ctx: &TickContext) -> bool;

    /// Called once before the first `perform` of a tick.
    ///
    /// # Errors
    ///
    /// Any [`TaskError`] becomes a [`TaskFault`] for this task.
    fn before(&self, surface: &Surface<T>, ctx: &TickContext) -> Result<(), TaskError> {
        let _ = (surface, ctx);
        Ok(())
    }

    /// Called once per cell of the region.
    ///
    /// # Errors
    ///
    /// Any [`TaskError`] becomes a [`TaskFault`] for this task.
    fn perform(
        &self,
        surface: &Surface<T>,
        ctx: &TickContext,
        x: usize,
        y: usize,
    ) -> Result<(), TaskError>;

    /// Called once after the last `perform` of a tick.
    ///
    /// # Errors
    ///
    /// Any [`TaskError`] becomes a [`TaskFault`] for this task.
    fn after(&self, surface: &Surface<T>, ctx: &TickContext) -> Result<(), TaskError> {
        let _ = (surface, ctx);
        Ok(())
    }
}

/// Builds one private task instance per worker.
pub trait TaskFactory<T>: Send + Sync {
    /// Build the task for `worker`, which owns `region`.
    fn build(&self, worker: WorkerId, region: &Region) -> Arc<dyn Task<T>>;
}

impl<T, F> TaskFactory<T> for F
where
    F: Fn(WorkerId, &Region) -> Arc<dyn Task<T>> + Send + Sync,
{
    fn build(&self, worker: WorkerId, region: &Region) -> Arc<dyn Task<T>> {
        self(worker, region)
    }
}

/// "Run every N checks" pacing counter for use inside [`Task::check`].
///
/// The counter is atomic so a shared task can use it too, in which case
/// every worker's check advances the same count.
#[derive(Debug)]
pub struct Delay {
    every: u64,
    count: AtomicU64,
}

impl Delay {
    /// Fire on every `every`-th call to [`Delay::ready`]. Zero behaves as 1.
    pub const fn new(every: u64) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            count: AtomicU64::new(0),
        }
    }

    /// Count one call; true on every `every`-th call.
    pub fn ready(&self) -> bool {
        let every = self.every;
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                let next = c.saturating_add(1);
                Some(if next >= every { 0 } else { next })
            })
            .unwrap_or_else(|c| c);
        previous.saturating_add(1) >= every
    }

    /// Calls counted since the last firing.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// The firing period.
    pub const fn every(&self) -> u64 {
        self.every
    }

    /// Start counting from zero again.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_fires_every_nth_call() {
        let delay = Delay::new(3);
        let fired: Vec<bool> = (0..7).map(|_| delay.ready()).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
        assert_eq!(delay.count(), 1);
    }

    #[test]
    fn delay_of_zero_fires_every_call() {
        let delay = Delay::new(0);
        assert_eq!(delay.every(), 1);
        assert!(delay.ready());
        assert!(delay.ready());
    }

    #[test]
    fn delay_reset_restarts_the_period() {
        let delay = Delay::new(2);
        assert!(!delay.ready());
        delay.reset();
        assert!(!delay.ready());
        assert!(delay.ready());
    }

    #[test]
    fn task_error_wraps_cell_error() {
        let cell = CellError::Cancelled {
            index: 4,
            thread: "t".to_owned(),
        };
        let err: TaskError = cell.clone().into();
        assert_eq!(err, TaskError::Cell(cell));
        assert_eq!(TaskError::failed("dry").to_string(), "dry");
    }

    #[test]
    fn fault_display_names_worker_and_task() {
        let fault = TaskFault {
            worker: WorkerId::new(2),
            task: "erosion".to_owned(),
            tick: 7,
            cause: FaultCause::Panic("boom".to_owned()),
        };
        assert_eq!(
            fault.to_string(),
            "worker-2 task `erosion` faulted on tick 7: panicked: boom"
        );
    }

    #[test]
    fn fault_policy_uses_snake_case() {
        let json = serde_json::to_string(&FaultPolicy::FailFast).unwrap_or_default();
        assert_eq!(json, "\"fail_fast\"");
    }
}
