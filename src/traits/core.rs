//! Core plugin traits.

use std::future::Future;

use crate::{
    coordinator::JointCancellation,
    errors::PluginResult,
    hardware::GatingPass,
    types::{Algorithm, Device, DriverVersion},
};

/// Contract a miner plugin offers to the host.
pub trait MinerPluginTrait: Send + Sync {
    /// Miner instance created for a group of (device, algorithm) pairs.
    type Miner;

    /// Stable plugin identifier.
    fn uuid(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Plugin version as `(major, minor)`.
    fn version(&self) -> (u32, u32);

    /// Gate `devices` and assign miner device indices.
    fn supported_algorithms(&self, devices: &[Device], driver: DriverVersion) -> GatingPass;

    /// Whether two pairs can share one miner instance.
    fn can_group(&self, a: &(Device, Algorithm), b: &(Device, Algorithm)) -> bool;

    /// Create a miner for the given pairs.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Configuration` if the pairs cannot share one
    /// miner process.
    fn create_miner(
        &self, pairs: Vec<(Device, Algorithm)>, pass: &GatingPass,
    ) -> PluginResult<Self::Miner>;
}

/// One benchmark measurement, run under a [`JointCancellation`].
///
/// The routine should stop its process when `stop` fires. It returns the
/// measured speed in H/s and whether the reading is usable.
pub trait BenchmarkRoutine {
    /// Run the benchmark once.
    fn execute(self, stop: JointCancellation) -> impl Future<Output = PluginResult<(f64, bool)>>;
}

impl<F, Fut> BenchmarkRoutine for F
where
    F: FnOnce(JointCancellation) -> Fut,
    Fut: Future<Output = PluginResult<(f64, bool)>>,
{
    fn execute(self, stop: JointCancellation) -> impl Future<Output = PluginResult<(f64, bool)>> {
        self(stop)
    }
}
