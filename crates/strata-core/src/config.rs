//! Configuration loading and typed config structures for the Strata engine.
//!
//! The canonical configuration lives in `strata-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure and a loader that reads the file. Structural validation (grid
//! divisibility, non-zero timeouts) is a separate step,
//! [`SurfaceConfig::validate`], which the coordinator runs before any worker
//! thread exists.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use strata_grid::ConfigurationError;

use crate::task::FaultPolicy;

/// Environment variable that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "STRATA_LOG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `strata-config.yaml`. Every field has a
/// default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SurfaceConfig {
    /// Grid dimensions and worker partitioning.
    #[serde(default)]
    pub grid: GridConfig,

    /// Pacing and lock timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Worker behaviour.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Simulation clock.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Simulation boundary parameters.
    #[serde(default)]
    pub simulation: SimulationBoundsConfig,

    /// World identity and seeding.
    #[serde(default)]
    pub world: WorldConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SurfaceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// The `STRATA_LOG` environment variable overrides `logging.level`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        if yaml.trim().is_empty() {
            let mut config = Self::default();
            config.logging.apply_env_overrides();
            return Ok(config);
        }
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.logging.apply_env_overrides();
        Ok(config)
    }

    /// Check the structural constraints the coordinator relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for a zero width or division, a width
    /// that is not a multiple of the division, or a zero lock timeout.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.grid.width == 0 {
            return Err(ConfigurationError::ZeroWidth);
        }
        if self.grid.thread_division == 0 {
            return Err(ConfigurationError::ZeroDivision);
        }
        if self.grid.width.checked_rem(self.grid.thread_division) != Some(0) {
            return Err(ConfigurationError::NotDivisible {
                width: self.grid.width,
                division: self.grid.thread_division,
            });
        }
        if self.timing.lock_timeout_ms == 0 {
            return Err(ConfigurationError::ZeroLockTimeout);
        }
        Ok(())
    }

    /// Number of workers this configuration produces.
    pub const fn worker_count(&self) -> usize {
        self.grid.thread_division.saturating_mul(self.grid.thread_division)
    }
}

/// Grid dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GridConfig {
    /// Side length of the square grid.
    #[serde(default = "default_width")]
    pub width: usize,

    /// Regions per side; the pool runs `thread_division^2` workers.
    #[serde(default = "default_thread_division")]
    pub thread_division: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            thread_division: default_thread_division(),
        }
    }
}

/// Pacing and lock timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Milliseconds between coordinator ticks.
    #[serde(default = "default_coordinator_delay_ms")]
    pub coordinator_delay_ms: u64,

    /// Milliseconds each worker sleeps between its own ticks.
    #[serde(default = "default_worker_delay_ms")]
    pub worker_delay_ms: u64,

    /// Bounded wait for a contended cell before it counts as starvation.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Whether workers tick freely (`true`) or one tick per release.
    #[serde(default = "default_true")]
    pub continuous: bool,
}

impl TimingConfig {
    /// The lock timeout as a [`Duration`].
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            coordinator_delay_ms: default_coordinator_delay_ms(),
            worker_delay_ms: default_worker_delay_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            continuous: true,
        }
    }
}

/// Worker behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkersConfig {
    /// What a worker does when one of its tasks faults.
    #[serde(default)]
    pub fault_policy: FaultPolicy,
}

/// Simulation clock settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Simulated years per coordinator tick.
    #[serde(default = "default_years_per_tick")]
    pub years_per_tick: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            years_per_tick: default_years_per_tick(),
        }
    }
}

/// Simulation boundary configuration.
///
/// A value of 0 for either limit means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SimulationBoundsConfig {
    /// Maximum number of coordinator ticks (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// Maximum wall-clock seconds (0 = unlimited).
    #[serde(default)]
    pub max_real_time_seconds: u64,
}

/// World identity and seeding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable world name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Random seed handed to task factories.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            seed: default_seed(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl LoggingConfig {
    /// Override the level with `STRATA_LOG` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(LOG_LEVEL_ENV) {
            self.level = val;
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_width() -> usize {
    128
}

const fn default_thread_division() -> usize {
    2
}

const fn default_coordinator_delay_ms() -> u64 {
    250
}

const fn default_worker_delay_ms() -> u64 {
    20
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

const fn default_years_per_tick() -> u64 {
    10_000
}

fn default_world_name() -> String {
    "Pangaea".to_owned()
}

const fn default_seed() -> u64 {
    42
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SurfaceConfig::default();
        assert_eq!(config.grid.width, 128);
        assert_eq!(config.grid.thread_division, 2);
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.timing.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.workers.fault_policy, FaultPolicy::Resilient);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
grid:
  width: 60
  thread_division: 3

timing:
  coordinator_delay_ms: 10
  worker_delay_ms: 0
  lock_timeout_ms: 750
  continuous: false

workers:
  fault_policy: fail_fast

clock:
  years_per_tick: 500

simulation:
  max_ticks: 20
  max_real_time_seconds: 60

world:
  name: "Test World"
  seed: 7
"#;

        let config = SurfaceConfig::parse(yaml);
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.grid.width, 60);
        assert_eq!(config.worker_count(), 9);
        assert_eq!(config.timing.lock_timeout_ms, 750);
        assert!(!config.timing.continuous);
        assert_eq!(config.workers.fault_policy, FaultPolicy::FailFast);
        assert_eq!(config.clock.years_per_tick, 500);
        assert_eq!(config.simulation.max_ticks, 20);
        assert_eq!(config.world.name, "Test World");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = SurfaceConfig::parse("world:\n  seed: 9\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();
        assert_eq!(config.world.seed, 9);
        assert_eq!(config.grid.width, 128);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(SurfaceConfig::parse("").is_ok());
    }

    #[test]
    fn parse_rejects_unknown_fault_policy() {
        let result = SurfaceConfig::parse("workers:\n  fault_policy: shrug\n");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }

    #[test]
    fn validate_rejects_indivisible_width() {
        let mut config = SurfaceConfig::default();
        config.grid.width = 10;
        config.grid.thread_division = 4;
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::NotDivisible {
                width: 10,
                division: 4
            })
        );
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        let mut config = SurfaceConfig::default();
        config.grid.width = 0;
        assert_eq!(config.validate(), Err(ConfigurationError::ZeroWidth));

        let mut config = SurfaceConfig::default();
        config.grid.thread_division = 0;
        assert_eq!(config.validate(), Err(ConfigurationError::ZeroDivision));

        let mut config = SurfaceConfig::default();
        config.timing.lock_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigurationError::ZeroLockTimeout));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("strata-config.yaml");
        if path.exists() {
            let config = SurfaceConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
