//! Ordered task list for one worker.
//!
//! The manager owns the worker's region and runs its tasks in registration
//! order. Each task goes through `check`, `before`, `perform` over every
//! cell of the region (rows outermost), then `after`. Every hook call is
//! fenced with `catch_unwind`, so a panicking task becomes a [`TaskFault`]
//! instead of tearing down the worker thread with cells still checked out.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::Serialize;
use strata_grid::Region;
use tracing::error;

use crate::surface::Surface;
use crate::task::{FaultCause, FaultPolicy, Task, TaskError, TaskFault, TickContext};

/// Counters for one [`TaskManager::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Tasks whose `check` was called.
    pub tasks_checked: u64,
    /// Tasks whose `check` returned true.
    pub tasks_run: u64,
    /// Successful `perform` calls.
    pub performed: u64,
    /// Faults logged and skipped under [`FaultPolicy::Resilient`].
    pub faults: u64,
}

/// The tasks one worker runs over its region.
pub struct TaskManager<T> {
    region: Region,
    tasks: Vec<Arc<dyn Task<T>>>,
}

impl<T> std::fmt::Debug for TaskManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("region", &self.region)
            .field("tasks", &self.task_names())
            .finish()
    }
}

impl<T> TaskManager<T> {
    /// Create an empty manager for `region`.
    pub const fn new(region: Region) -> Self {
        Self {
            region,
            tasks: Vec::new(),
        }
    }

    /// Append a task. Registration order is execution order.
    pub fn add_task(&mut self, task: Arc<dyn Task<T>>) {
        self.tasks.push(task);
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The region this manager iterates.
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Run every task once over the region.
    ///
    /// # Errors
    ///
    /// Under [`FaultPolicy::FailFast`] the first fault is returned and the
    /// remaining tasks are not run. Under [`FaultPolicy::Resilient`] faults
    /// are logged and counted in [`RunReport::faults`] and this never fails.
    pub fn run(
        &self,
        surface: &Surface<T>,
        ctx: &TickContext,
        policy: FaultPolicy,
    ) -> Result<RunReport, Box<TaskFault>> {
        let mut report = RunReport::default();
        for task in &self.tasks {
            report.tasks_checked = report.tasks_checked.saturating_add(1);
            let Err(cause) = self.run_task(task.as_ref(), surface, ctx, &mut report) else {
                continue;
            };
            let fault = TaskFault {
                worker: ctx.worker,
                task: task.name().to_owned(),
                tick: ctx.worker_tick,
                cause,
            };
            match policy {
                FaultPolicy::FailFast => return Err(Box::new(fault)),
                FaultPolicy::Resilient => {
                    report.faults = report.faults.saturating_add(1);
                    error!(
                        worker = %fault.worker,
                        task = %fault.task,
                        tick = fault.tick,
                        error = %fault.cause,
                        "Task faulted, skipping the rest of it this tick"
                    );
                }
            }
        }
        Ok(report)
    }

    fn run_task(
        &self,
        task: &dyn Task<T>,
        surface: &Surface<T>,
        ctx: &TickContext,
        report: &mut RunReport,
    ) -> Result<(), FaultCause> {
        if !fenced(|| Ok(task.check(ctx)))? {
            return Ok(());
        }
        report.tasks_run = report.tasks_run.saturating_add(1);

        fenced(|| task.before(surface, ctx))?;
        for c in self.region.coords() {
            fenced(|| task.perform(surface, ctx, c.x, c.y))?;
            report.performed = report.performed.saturating_add(1);
        }
        fenced(|| task.after(surface, ctx))
    }
}

/// Call a hook, turning both errors and panics into a [`FaultCause`].
fn fenced<R>(hook: impl FnOnce() -> Result<R, TaskError>) -> Result<R, FaultCause> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result.map_err(FaultCause::Error),
        Err(payload) => Err(FaultCause::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
