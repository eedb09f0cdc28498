//! GMiner plugin error types.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Plugin operation errors.
///
/// Timeouts and user cancellation are not errors; they resolve into a
/// [`BenchmarkOutcome`](crate::BenchmarkOutcome).
#[derive(Debug, Error)]
pub enum PluginError {
    /// The miner binary could not be started.
    #[error("Failed to launch {binary}: {source}")]
    ProcessLaunch {
        /// Path of the binary that failed to start.
        binary: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Reading from or waiting on a running process failed.
    #[error("Process I/O error: {0}")]
    ProcessIo(#[from] io::Error),
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The benchmark routine could not produce a reading.
    #[error("Benchmark error: {0}")]
    Benchmark(String),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
