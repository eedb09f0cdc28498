//! GMiner plugin type definitions.

use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::PluginError;

/// Opaque device identity assigned by the host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a device id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// NVIDIA CUDA GPU.
    Cuda,
    /// AMD OpenCL GPU.
    Amd,
    /// Host CPU.
    Cpu,
}

/// Snapshot of a compute device supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Host-assigned identity.
    pub id:           DeviceId,
    /// Device family.
    pub kind:         DeviceKind,
    /// Human readable name.
    pub name:         String,
    /// PCIe bus id, used to order devices for the miner binary.
    pub pcie_bus_id:  u32,
    /// Dedicated memory in bytes, if known.
    pub memory_bytes: Option<u64>,
    /// CUDA compute capability major version, if known.
    pub sm_major:     Option<u32>,
}

impl Device {
    /// Create a CUDA device snapshot.
    pub fn cuda(
        id: impl Into<String>, name: impl Into<String>, pcie_bus_id: u32, memory_bytes: u64,
        sm_major: u32,
    ) -> Self {
        Self {
            id: DeviceId::new(id),
            kind: DeviceKind::Cuda,
            name: name.into(),
            pcie_bus_id,
            memory_bytes: Some(memory_bytes),
            sm_major: Some(sm_major),
        }
    }
}

/// Installed driver version (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DriverVersion {
    /// Major version, e.g. `384`.
    pub major: u32,
    /// Minor version, e.g. `11`.
    pub minor: u32,
}

impl DriverVersion {
    /// Create a driver version.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

impl FromStr for DriverVersion {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PluginError::Configuration(format!("Invalid driver version '{s}'"));
        let mut parts = s.trim().splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

/// Mining algorithms known to the GMiner plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// Equihash 144,5.
    ZHash,
    /// Equihash 150,5.
    Beam,
    /// Cuckaroo29 (Grin).
    GrinCuckaroo29,
    /// Cuckatoo31 (Grin).
    GrinCuckatoo31,
    /// Cuckoo29 (Aeternity).
    CuckooCycle,
    /// Equihash 96,5.
    Equihash96_5,
    /// Equihash 192,7.
    Equihash192_7,
    /// Equihash 210,9.
    Equihash210_9,
}

impl AlgorithmType {
    /// Display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZHash => "ZHash",
            Self::Beam => "Beam",
            Self::GrinCuckaroo29 => "GrinCuckaroo29",
            Self::GrinCuckatoo31 => "GrinCuckatoo31",
            Self::CuckooCycle => "CuckooCycle",
            Self::Equihash96_5 => "Equihash96_5",
            Self::Equihash192_7 => "Equihash192_7",
            Self::Equihash210_9 => "Equihash210_9",
        }
    }
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An algorithm offered by a specific plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Algorithm {
    /// UUID of the plugin that owns this algorithm entry.
    pub plugin_uuid:    String,
    /// Algorithm identifier.
    pub algorithm_type: AlgorithmType,
}

impl Algorithm {
    /// Create an algorithm entry owned by `plugin_uuid`.
    pub fn new(plugin_uuid: impl Into<String>, algorithm_type: AlgorithmType) -> Self {
        Self { plugin_uuid: plugin_uuid.into(), algorithm_type }
    }
}

/// Outcome of a single hashrate parse.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ParseResult {
    /// Parsed hashrate in H/s (0 when not found).
    pub value: f64,
    /// Whether a hashrate was found.
    pub found: bool,
}

/// Lifecycle of a single benchmark attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BenchmarkState {
    /// Not started yet.
    Pending,
    /// Waiting out the pre-delay.
    Delaying,
    /// Benchmark routine is executing.
    Running,
    /// Routine finished before the deadline.
    Succeeded,
    /// Deadline elapsed first.
    TimedOut,
    /// External cancel signal fired first.
    Cancelled,
    /// Routine reported an error.
    Failed,
}

impl BenchmarkState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Cancelled | Self::Failed)
    }
}

/// Terminal result of a benchmark attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkOutcome {
    /// Measured speed in H/s (0 on failure).
    pub speed:   f64,
    /// Whether the benchmark produced a usable reading.
    pub success: bool,
    /// Diagnostic message, empty on success.
    pub message: String,
    /// Terminal state that produced this outcome.
    pub state:   BenchmarkState,
}

impl BenchmarkOutcome {
    /// Outcome of a routine that ran to completion.
    pub fn completed(speed: f64, success: bool) -> Self {
        Self { speed, success, message: String::new(), state: BenchmarkState::Succeeded }
    }

    /// Zero-speed failure with a diagnostic message.
    pub fn failure(state: BenchmarkState, message: impl Into<String>) -> Self {
        Self { speed: 0.0, success: false, message: message.into(), state }
    }

    /// Outcome as the `(speed, success, message)` triple.
    #[must_use]
    pub fn into_tuple(self) -> (f64, bool, String) {
        (self.speed, self.success, self.message)
    }
}
