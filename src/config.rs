//! GMiner plugin configuration.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::{PluginError, PluginResult};

/// Wallet used for benchmark runs that need a pool connection.
pub const DEMO_USER: &str = "33hGFJZQAfbdzyHGqhJPvZwncDjUBdZqjW";

/// Text GMiner prints before its combined hashrate.
pub const GMINER_SPEED_MARKER: &str = "Total Speed:";

/// Configuration for launching the miner binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Path of the miner executable.
    pub binary_path:             PathBuf,
    /// Working directory for the miner process.
    pub working_dir:             PathBuf,
    /// Pool host name.
    pub pool_host:               String,
    /// Pool port.
    pub pool_port:               u16,
    /// Pool user (wallet or worker).
    pub username:                String,
    /// Extra arguments appended verbatim to every command line.
    pub extra_launch_parameters: String,
    /// Environment variables set for the miner process.
    pub environment:             BTreeMap<String, String>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            binary_path:             PathBuf::from(if cfg!(windows) { "miner.exe" } else { "miner" }),
            working_dir:             PathBuf::from("."),
            pool_host:               String::from("equihash144.eu.nicehash.com"),
            pool_port:               3369,
            username:                String::from(DEMO_USER),
            extra_launch_parameters: String::new(),
            environment:             BTreeMap::new(),
        }
    }
}

impl MinerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the miner executable and its working directory.
    pub fn with_binary(
        mut self, binary_path: impl Into<PathBuf>, working_dir: impl Into<PathBuf>,
    ) -> Self {
        self.binary_path = binary_path.into();
        self.working_dir = working_dir.into();
        self
    }

    /// Set the pool endpoint.
    pub fn with_pool(mut self, host: impl Into<String>, port: u16) -> Self {
        self.pool_host = host.into();
        self.pool_port = port;
        self
    }

    /// Set the pool user.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set extra launch parameters.
    pub fn with_extra_launch_parameters(mut self, params: impl Into<String>) -> Self {
        self.extra_launch_parameters = params.into();
        self
    }

    /// Add an environment variable for the miner process.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Configuration` if a required field is empty.
    pub fn validate(&self) -> PluginResult<()> {
        if self.binary_path.as_os_str().is_empty() {
            return Err(PluginError::Configuration("Miner binary path is empty".into()));
        }
        if self.pool_host.is_empty() || self.pool_port == 0 {
            return Err(PluginError::Configuration("Pool endpoint is not set".into()));
        }
        if self.username.is_empty() {
            return Err(PluginError::Configuration("Pool username is empty".into()));
        }
        Ok(())
    }
}

/// Benchmark timing and parsing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Time allowed for the benchmark after the pre-delay.
    pub timeout:          Duration,
    /// Wait before the benchmark starts.
    pub pre_delay:        Duration,
    /// Marker preceding the hashrate in miner output.
    pub marker:           String,
    /// Number of speed readings averaged into the result.
    pub samples_required: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            timeout:          Duration::from_secs(180),
            pre_delay:        Duration::from_secs(5),
            marker:           String::from(GMINER_SPEED_MARKER),
            samples_required: 2,
        }
    }
}

impl BenchmarkConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the benchmark timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the pre-delay.
    pub fn with_pre_delay(mut self, pre_delay: Duration) -> Self {
        self.pre_delay = pre_delay;
        self
    }

    /// Set the speed marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Set the number of readings to average.
    pub fn with_samples_required(mut self, samples: usize) -> Self {
        self.samples_required = samples;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Configuration` for a zero timeout, an empty
    /// marker or a zero sample count.
    pub fn validate(&self) -> PluginResult<()> {
        if self.timeout.is_zero() {
            return Err(PluginError::Configuration("Benchmark timeout must be positive".into()));
        }
        if self.marker.is_empty() {
            return Err(PluginError::Configuration("Speed marker is empty".into()));
        }
        if self.samples_required == 0 {
            return Err(PluginError::Configuration("At least one speed sample is required".into()));
        }
        Ok(())
    }
}
