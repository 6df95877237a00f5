//! Engine entry point for the Strata simulation substrate.
//!
//! Builds a terrain grid, registers the demo tasks, starts one worker
//! thread per region, and drives coordinator ticks until a run bound, an
//! operator stop (Ctrl-C), or worker exhaustion ends the run.
//!
//! # Startup sequence
//!
//! ```text
//! config -> logging -> grid + tasks -> start workers -> play -> run loop -> shutdown
//! ```

mod error;
mod progress;
mod tasks;
mod terrain;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use strata_core::runner::{log_run_end, run_surface};
use strata_core::{
    OperatorState, SimulationStatus, SurfaceConfig, SurfaceMapBuilder, Task, WorkerStats,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::error::EngineError;
use crate::progress::ProgressCallback;
use crate::tasks::{PassCounter, Rainfall, ThermalErosion};
use crate::terrain::Terrain;

/// Config file looked up in the working directory.
const CONFIG_FILE: &str = "strata-config.yaml";

/// Erosion runs on every n-th worker tick.
const EROSION_EVERY: u64 = 2;

/// Per-cell chance of rain on each worker tick.
const RAIN_CHANCE: f64 = 0.05;

/// Coordinator ticks between progress lines.
const PROGRESS_EVERY: u64 = 20;

/// End-of-run summary logged as JSON.
#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: Uuid,
    world: &'a str,
    status: SimulationStatus,
    passes: u64,
    cells_visited: u64,
    workers: Vec<WorkerStats>,
    faults: Vec<String>,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, startup, the run loop, or any worker
/// fails.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration (logging level lives there).
    let config = load_config()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    let run_id = Uuid::now_v7();
    info!(%run_id, "strata-engine starting");
    info!(
        world = config.world.name,
        seed = config.world.seed,
        width = config.grid.width,
        thread_division = config.grid.thread_division,
        workers = config.worker_count(),
        continuous = config.timing.continuous,
        fault_policy = ?config.workers.fault_policy,
        "Configuration loaded"
    );

    // 3. Build the grid and register tasks.
    let seed = config.world.seed;
    let world = config.world.name.clone();
    let coordinator_delay_ms = config.timing.coordinator_delay_ms;
    let bounds = config.simulation.clone();
    let counter = Arc::new(PassCounter::default());

    let mut map = SurfaceMapBuilder::<Terrain>::new(config)
        .task(Arc::clone(&counter) as Arc<dyn Task<Terrain>>)
        .task_factory(|worker, _region| ThermalErosion::new(worker, EROSION_EVERY))
        .task_factory(Rainfall::for_worker(seed, RAIN_CHANCE))
        .build(terrain::generator(seed))?;

    // 4. Start the workers (paused) and the operator.
    map.start()?;
    let operator = Arc::new(OperatorState::new(coordinator_delay_ms, &bounds));
    info!(
        max_ticks = operator.max_ticks(),
        max_real_time_seconds = operator.max_real_time_seconds(),
        tick_interval_ms = operator.tick_interval_ms(),
        "Operator state initialized"
    );

    // 5. Ctrl-C requests a clean stop.
    {
        let operator = Arc::clone(&operator);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received, stopping");
                    operator.request_stop();
                }
                Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
    }

    // 6. Run.
    map.play_all();
    let mut callback = ProgressCallback::new(PROGRESS_EVERY);
    let result = run_surface(&mut map, &operator, &mut callback).await?;
    log_run_end(&result);

    // 7. Tear down and summarise.
    let workers = map.stats();
    let status = operator.status(
        result.final_tick.map_or(0, |t| t.tick),
        map.live_workers(),
        workers.len(),
    );
    let report = map.shutdown();

    let summary = RunSummary {
        run_id,
        world: &world,
        status,
        passes: counter.passes(),
        cells_visited: counter.cells(),
        workers,
        faults: report.faults.iter().map(ToString::to_string).collect(),
    };
    info!(
        summary = %serde_json::to_string(&summary)?,
        samples = callback.samples(),
        skipped_samples = callback.skipped(),
        "Run summary"
    );

    let report = report.into_result()?;
    info!(
        workers_joined = report.workers_joined,
        "strata-engine shutdown complete"
    );
    Ok(())
}

/// Load configuration from `strata-config.yaml` in the working directory,
/// falling back to defaults when the file is absent.
fn load_config() -> Result<SurfaceConfig, EngineError> {
    let path = Path::new(CONFIG_FILE);
    if path.exists() {
        Ok(SurfaceConfig::from_file(path)?)
    } else {
        let mut config = SurfaceConfig::default();
        config.logging.apply_env_overrides();
        Ok(config)
    }
}
