//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup, the run loop, and
//! shutdown so `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: strata_core::ConfigError,
    },

    /// Building, starting, or tearing down the surface failed.
    #[error("surface error: {source}")]
    Surface {
        /// The underlying coordinator error.
        #[from]
        source: strata_core::SurfaceError,
    },

    /// The run loop failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: strata_core::RunnerError,
    },

    /// The run summary could not be serialized.
    #[error("summary serialization error: {source}")]
    Json {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },
}
