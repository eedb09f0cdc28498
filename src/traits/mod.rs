//! GMiner plugin trait definitions.
//!
//! This module contains the contracts the plugin exposes to its host and the
//! seam between the benchmark coordinator and benchmark routines.

mod core;

pub use core::{BenchmarkRoutine, MinerPluginTrait};
