//! # GMiner Plugin
//!
//! Miner plugin for the GMiner CUDA binary. It decides which algorithms each
//! NVIDIA device can run, launches the miner to benchmark a device group, and
//! turns the miner's console output into a hashrate under a time budget that
//! the user can cancel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GMiner Plugin                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Capability  │  │  Benchmark  │  │  Supervised         │  │
//! │  │    Gate     │  │ Coordinator │  │  Process            │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//! │         │                │                     │             │
//! │         ▼                ▼                     ▼             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Hashrate Parser                     │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        tokio (process, timers, watch)  │  tracing            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Capability Gating**: driver, compute capability and memory rules
//!   select algorithms per device and assign bus-ordered miner indices
//! - **Supervised Process**: one launch spec for interactive mining and
//!   captured benchmark runs, with environment overlay
//! - **Benchmark Coordination**: pre-delay, hard timeout and user
//!   cancellation folded into one `(speed, success, message)` outcome
//! - **Hashrate Parsing**: marker-based extraction with kH/MH/GH scaling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gminer_plugin::{
//!     BenchmarkConfig, CancelHandle, DriverVersion, GMinerPlugin, MinerConfig, MinerPluginTrait,
//! };
//!
//! let plugin = GMinerPlugin::new(MinerConfig::default().with_binary("./miner", "."))?;
//! let pass = plugin.supported_algorithms(&devices, DriverVersion::new(411, 31));
//! let miner = plugin.create_miner(pairs, &pass)?;
//!
//! let cancel = CancelHandle::new();
//! let outcome = miner.benchmark(&BenchmarkConfig::default(), &cancel.signal()).await;
//! ```

mod config;
mod coordinator;
mod errors;
mod hardware;
mod hashrate;
mod plugin;
mod process;
mod traits;
mod types;

pub use config::{BenchmarkConfig, DEMO_USER, GMINER_SPEED_MARKER, MinerConfig};
pub use coordinator::{
    BenchmarkCoordinator, CANCEL_MESSAGE, CancelHandle, CancelReason, CancelSignal,
    JointCancellation, TIMEOUT_MESSAGE, run_benchmark,
};
pub use errors::{PluginError, PluginResult};
pub use hardware::{
    CapabilityRule, CapabilityRules, DeviceIndexMap, GatingPass, MIN_DRIVER_VERSION, MIN_SM_MAJOR,
    algorithm_single_type, can_group, device_ids_in_order,
};
pub use hashrate::{HashRateUnit, format_hash_rate, string_after, try_get_hashrate_after};
pub use plugin::{GMINER_UUID, GMiner, GMinerPlugin};
pub use process::{CapturedOutput, ProcessMode, ProcessSpec, SupervisedProcess, split_command_line};
pub use traits::{BenchmarkRoutine, MinerPluginTrait};
pub use types::{
    Algorithm, AlgorithmType, BenchmarkOutcome, BenchmarkState, Device, DeviceId, DeviceKind,
    DriverVersion, ParseResult,
};
