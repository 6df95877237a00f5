//! Coordinator run loop with operator controls.
//!
//! [`run_surface`] drives coordinator ticks on the async side while the
//! workers tick on their own threads. Every iteration it honours:
//!
//! - **Pause/resume**: an operator pause parks every worker and waits
//! - **Clean stop**: operator stop ends the loop before the next tick
//! - **Bounded runs**: `max_ticks` and `max_real_time_seconds`
//! - **Step mode**: non-continuous workers are released one tick at a time,
//!   and only once all of them are parked
//! - **Worker exhaustion**: the loop ends once no worker thread is left
//!
//! The loop never joins worker threads; call
//! [`SurfaceMap::shutdown`] afterwards.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::SurfaceError;
use crate::operator::{OperatorState, SimulationEndReason};
use crate::surface_map::{CoordinatorTick, SurfaceMap};

/// Errors that can end the run loop early.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A coordinator tick failed.
    #[error("surface error: {source}")]
    Surface {
        /// The underlying coordinator error.
        #[from]
        source: SurfaceError,
    },
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    /// Why the loop ended.
    pub end_reason: SimulationEndReason,
    /// The last coordinator tick, if any ran.
    pub final_tick: Option<CoordinatorTick>,
    /// Coordinator ticks executed by this call.
    pub total_ticks: u64,
}

/// Called after every coordinator tick.
pub trait TickCallback<T>: Send {
    /// Observe the tick that just completed.
    fn on_tick(&mut self, tick: &CoordinatorTick, map: &SurfaceMap<T>);
}

/// A callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl<T> TickCallback<T> for NoOpCallback {
    fn on_tick(&mut self, _tick: &CoordinatorTick, _map: &SurfaceMap<T>) {}
}

/// Drive coordinator ticks until a termination condition is met.
///
/// The map must already be started and its workers playing.
///
/// # Errors
///
/// Returns [`RunnerError`] if a coordinator tick fails.
pub async fn run_surface<T>(
    map: &mut SurfaceMap<T>,
    operator: &Arc<OperatorState>,
    callback: &mut dyn TickCallback<T>,
) -> Result<RunResult, RunnerError> {
    let mut final_tick: Option<CoordinatorTick> = None;
    let mut total_ticks: u64 = 0;

    info!(
        max_ticks = operator.max_ticks(),
        max_real_time_seconds = operator.max_real_time_seconds(),
        tick_interval_ms = operator.tick_interval_ms(),
        workers = map.workers().len(),
        continuous = map.is_continuous(),
        "Run loop starting"
    );

    let end_reason = loop {
        // --- Operator pause ---
        if operator.is_paused() {
            map.pause_all();
            info!("Run paused, waiting for resume...");
            operator.wait_if_paused().await;
            if !operator.is_stop_requested() {
                map.play_all();
                info!("Run resumed");
            }
        }

        // --- Stop request ---
        if operator.is_stop_requested() {
            info!("Operator stop requested");
            break SimulationEndReason::OperatorStop;
        }

        // --- Time limit ---
        if operator.time_limit_reached() {
            info!(
                max_seconds = operator.max_real_time_seconds(),
                elapsed = operator.elapsed_seconds(),
                "Real-time limit reached"
            );
            break SimulationEndReason::MaxRealTimeReached;
        }

        // --- Step mode: release only a fully parked pool ---
        if !map.is_continuous() {
            map.all_paused_then_resume();
        }

        // --- Coordinator tick ---
        let tick = map.tick()?;
        total_ticks = total_ticks.saturating_add(1);
        callback.on_tick(&tick, map);
        final_tick = Some(tick);

        if tick.live_workers == 0 {
            info!(tick = tick.tick, "No live workers left");
            break SimulationEndReason::WorkersExhausted;
        }

        if operator.tick_limit_reached(tick.tick) {
            info!(
                tick = tick.tick,
                max_ticks = operator.max_ticks(),
                "Tick limit reached"
            );
            break SimulationEndReason::MaxTicksReached;
        }

        tokio::time::sleep(Duration::from_millis(operator.tick_interval_ms())).await;
    };

    operator.set_end_reason(end_reason);
    Ok(RunResult {
        end_reason,
        final_tick,
        total_ticks,
    })
}

/// Log the end of a run.
pub fn log_run_end(result: &RunResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_tick.map(|t| t.tick),
        final_planet_age = result.final_tick.map(|t| t.planet_age),
        average_tick_ms = result.final_tick.map(|t| t.average_tick_millis),
        "Run ended"
    );
}
