//! Runtime control of a run: pause, stop, coordinator speed, and bounds.
//!
//! [`OperatorState`] is shared (behind an `Arc`) between the async run loop
//! and whoever steers it: a Ctrl-C handler, a control task, tests. It never
//! touches the workers itself; the run loop reads it once per coordinator
//! tick and fans changes out to the [`SurfaceMap`](crate::surface_map::SurfaceMap).
//!
//! The run mode lives in a [`watch`] channel so a paused loop can sleep
//! until the mode changes. Stopping is terminal: once requested, pause and
//! resume are ignored.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::SimulationBoundsConfig;

/// Shortest coordinator interval; smaller requests are raised to it.
pub const MIN_TICK_INTERVAL_MS: u64 = 1;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEndReason {
    /// `max_ticks` coordinator ticks ran.
    MaxTicksReached,
    /// `max_real_time_seconds` of wall-clock time passed.
    MaxRealTimeReached,
    /// [`OperatorState::request_stop`] was called.
    OperatorStop,
    /// Every worker thread has exited.
    WorkersExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Running,
    Paused,
    Stopping,
}

/// Control block for one run.
#[derive(Debug)]
pub struct OperatorState {
    mode: watch::Sender<RunMode>,
    tick_interval_ms: AtomicU64,
    bounds: SimulationBoundsConfig,
    started: Instant,
    started_at: DateTime<Utc>,
    end_reason: OnceLock<SimulationEndReason>,
}

impl OperatorState {
    /// A running operator with the given coordinator interval and bounds.
    pub fn new(tick_interval_ms: u64, bounds: &SimulationBoundsConfig) -> Self {
        let (mode, _) = watch::channel(RunMode::Running);
        Self {
            mode,
            tick_interval_ms: AtomicU64::new(tick_interval_ms.max(MIN_TICK_INTERVAL_MS)),
            bounds: bounds.clone(),
            started: Instant::now(),
            started_at: Utc::now(),
            end_reason: OnceLock::new(),
        }
    }

    fn mode(&self) -> RunMode {
        *self.mode.borrow()
    }

    /// Move from `from` to `to`; any other current mode is left alone.
    fn transition(&self, from: RunMode, to: RunMode) -> bool {
        self.mode.send_if_modified(|mode| {
            if *mode == from {
                *mode = to;
                true
            } else {
                false
            }
        })
    }

    // -----------------------------------------------------------------------
    // Mode
    // -----------------------------------------------------------------------

    /// Whether the run is paused.
    pub fn is_paused(&self) -> bool {
        self.mode() == RunMode::Paused
    }

    /// Pause a running run. Returns false if it was not running.
    pub fn pause(&self) -> bool {
        self.transition(RunMode::Running, RunMode::Paused)
    }

    /// Resume a paused run. Returns false if it was not paused.
    pub fn resume(&self) -> bool {
        self.transition(RunMode::Paused, RunMode::Running)
    }

    /// Stop the run. Wakes a loop waiting in [`OperatorState::wait_if_paused`].
    pub fn request_stop(&self) {
        self.mode.send_replace(RunMode::Stopping);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.mode() == RunMode::Stopping
    }

    /// Return once the run is no longer paused.
    pub async fn wait_if_paused(&self) {
        let mut mode = self.mode.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = mode.wait_for(|m| *m != RunMode::Paused).await;
    }

    // -----------------------------------------------------------------------
    // Coordinator speed
    // -----------------------------------------------------------------------

    /// Current coordinator interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Change the coordinator interval, effective from the next tick.
    ///
    /// Values below [`MIN_TICK_INTERVAL_MS`] are raised to it. Returns the
    /// previous interval.
    pub fn set_tick_interval_ms(&self, ms: u64) -> u64 {
        self.tick_interval_ms
            .swap(ms.max(MIN_TICK_INTERVAL_MS), Ordering::AcqRel)
    }

    // -----------------------------------------------------------------------
    // Bounds and outcome
    // -----------------------------------------------------------------------

    /// Whether `tick` has reached a non-zero `max_ticks`.
    pub const fn tick_limit_reached(&self, tick: u64) -> bool {
        self.bounds.max_ticks > 0 && tick >= self.bounds.max_ticks
    }

    /// Whether a non-zero `max_real_time_seconds` has elapsed.
    pub fn time_limit_reached(&self) -> bool {
        let limit = self.bounds.max_real_time_seconds;
        limit > 0 && self.elapsed_seconds() >= limit
    }

    /// Whole seconds since the operator was created.
    pub fn elapsed_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Configured tick bound, 0 for none.
    pub const fn max_ticks(&self) -> u64 {
        self.bounds.max_ticks
    }

    /// Configured wall-clock bound in seconds, 0 for none.
    pub const fn max_real_time_seconds(&self) -> u64 {
        self.bounds.max_real_time_seconds
    }

    /// Record why the run ended. The first reason recorded wins.
    pub fn set_end_reason(&self, reason: SimulationEndReason) {
        let _ = self.end_reason.set(reason);
    }

    /// Why the run ended, once it has.
    pub fn end_reason(&self) -> Option<SimulationEndReason> {
        self.end_reason.get().copied()
    }

    /// Snapshot of the run, for logs or a status endpoint.
    pub fn status(&self, tick: u64, live_workers: usize, workers: usize) -> SimulationStatus {
        SimulationStatus {
            tick,
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms(),
            elapsed_seconds: self.elapsed_seconds(),
            max_ticks: self.bounds.max_ticks,
            max_real_time_seconds: self.bounds.max_real_time_seconds,
            live_workers,
            workers,
            end_reason: self.end_reason(),
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// Serializable snapshot returned by [`OperatorState::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStatus {
    /// Coordinator tick the snapshot was taken at.
    pub tick: u64,
    /// Paused by the operator.
    pub paused: bool,
    /// Stop requested.
    pub stop_requested: bool,
    /// Coordinator interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Whole seconds since start.
    pub elapsed_seconds: u64,
    /// Tick bound, 0 for none.
    pub max_ticks: u64,
    /// Wall-clock bound in seconds, 0 for none.
    pub max_real_time_seconds: u64,
    /// Worker threads still running.
    pub live_workers: usize,
    /// Workers in the pool.
    pub workers: usize,
    /// Why the run ended, once it has.
    pub end_reason: Option<SimulationEndReason>,
    /// Start time, RFC 3339.
    pub started_at: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn bounds(max_ticks: u64) -> SimulationBoundsConfig {
        SimulationBoundsConfig {
            max_ticks,
            max_real_time_seconds: 0,
        }
    }

    #[test]
    fn pause_and_resume_only_move_between_their_modes() {
        let op = OperatorState::new(100, &bounds(0));
        assert!(!op.is_paused());
        assert!(!op.resume());
        assert!(op.pause());
        assert!(op.is_paused());
        assert!(!op.pause());
        assert!(op.resume());
        assert!(!op.is_paused());
    }

    #[test]
    fn stop_is_terminal() {
        let op = OperatorState::new(100, &bounds(0));
        op.pause();
        op.request_stop();
        assert!(op.is_stop_requested());
        assert!(!op.is_paused());
        assert!(!op.pause());
        assert!(!op.resume());
        assert!(op.is_stop_requested());
    }

    #[test]
    fn interval_is_clamped_and_swapped() {
        let op = OperatorState::new(0, &bounds(0));
        assert_eq!(op.tick_interval_ms(), MIN_TICK_INTERVAL_MS);
        assert_eq!(op.set_tick_interval_ms(250), MIN_TICK_INTERVAL_MS);
        assert_eq!(op.set_tick_interval_ms(0), 250);
        assert_eq!(op.tick_interval_ms(), MIN_TICK_INTERVAL_MS);
    }

    #[test]
    fn zero_bounds_never_trip() {
        let op = OperatorState::new(100, &bounds(0));
        assert!(!op.tick_limit_reached(u64::MAX));
        assert!(!op.time_limit_reached());

        let op = OperatorState::new(100, &bounds(10));
        assert!(!op.tick_limit_reached(9));
        assert!(op.tick_limit_reached(10));
    }

    #[test]
    fn first_end_reason_wins() {
        let op = OperatorState::new(100, &bounds(0));
        assert_eq!(op.end_reason(), None);
        op.set_end_reason(SimulationEndReason::OperatorStop);
        op.set_end_reason(SimulationEndReason::MaxTicksReached);
        assert_eq!(op.end_reason(), Some(SimulationEndReason::OperatorStop));
    }

    #[tokio::test]
    async fn resume_and_stop_wake_a_paused_waiter() {
        let op = Arc::new(OperatorState::new(100, &bounds(0)));
        op.pause();
        let waiter = {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait_if_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        op.resume();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();

        op.pause();
        let waiter = {
            let op = Arc::clone(&op);
            tokio::spawn(async move { op.wait_if_paused().await })
        };
        op.request_stop();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn status_serializes_the_end_reason() {
        let op = OperatorState::new(100, &bounds(0));
        op.set_end_reason(SimulationEndReason::WorkersExhausted);
        let status = op.status(7, 3, 4);
        assert_eq!((status.tick, status.live_workers, status.workers), (7, 3, 4));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json.get("end_reason").and_then(serde_json::Value::as_str),
            Some("workers_exhausted")
        );
    }
}
