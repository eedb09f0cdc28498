//! GMiner plugin implementation.

use tracing::{debug, info};

use crate::{
    config::{BenchmarkConfig, DEMO_USER, MinerConfig},
    coordinator::{BenchmarkCoordinator, CancelSignal, JointCancellation},
    errors::{PluginError, PluginResult},
    hardware::{self, CapabilityRules, GatingPass},
    hashrate::{format_hash_rate, try_get_hashrate_after},
    process::{ProcessSpec, SupervisedProcess},
    traits::{BenchmarkRoutine, MinerPluginTrait},
    types::{
        Algorithm, AlgorithmType, BenchmarkOutcome, BenchmarkState, Device, DeviceId,
        DriverVersion,
    },
};

/// Stable identifier of the GMiner plugin.
pub const GMINER_UUID: &str = "5def1b30-6a9e-11e9-9d5f-2f9f1ad4c3e8";

/// GMiner plugin: gates CUDA devices and creates [`GMiner`] instances.
#[derive(Debug, Clone)]
pub struct GMinerPlugin {
    config: MinerConfig,
    rules:  CapabilityRules,
}

impl GMinerPlugin {
    /// Create the plugin with GMiner's capability rules.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Configuration` if the configuration is invalid.
    pub fn new(config: MinerConfig) -> PluginResult<Self> {
        config.validate()?;
        Ok(Self { config, rules: CapabilityRules::gminer() })
    }

    /// Get current configuration.
    #[must_use]
    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Capability rules used for gating.
    #[must_use]
    pub fn rules(&self) -> &CapabilityRules {
        &self.rules
    }
}

impl MinerPluginTrait for GMinerPlugin {
    type Miner = GMiner;

    fn uuid(&self) -> &str {
        GMINER_UUID
    }

    fn name(&self) -> &str {
        "GMinerCuda9.0+"
    }

    fn version(&self) -> (u32, u32) {
        (1, 1)
    }

    fn supported_algorithms(&self, devices: &[Device], driver: DriverVersion) -> GatingPass {
        let pass = self.rules.supported_algorithms(devices, driver, GMINER_UUID);
        info!(
            %driver,
            devices = devices.len(),
            indexed = pass.device_indices.len(),
            supported = pass.supported.len(),
            "gated devices"
        );
        pass
    }

    fn can_group(&self, a: &(Device, Algorithm), b: &(Device, Algorithm)) -> bool {
        hardware::can_group(a, b)
    }

    fn create_miner(
        &self, pairs: Vec<(Device, Algorithm)>, pass: &GatingPass,
    ) -> PluginResult<GMiner> {
        let algorithm = hardware::algorithm_single_type(&pairs).ok_or_else(|| {
            PluginError::Configuration("Miner pairs must share exactly one algorithm".into())
        })?;
        GMiner::new(algorithm, hardware::device_ids_in_order(&pairs), pass, self.config.clone())
    }
}

/// One GMiner instance bound to an algorithm and a set of devices.
#[derive(Debug, Clone)]
pub struct GMiner {
    algorithm:  AlgorithmType,
    devices:    Vec<DeviceId>,
    /// Value passed to `--devices`.
    device_ids: String,
    config:     MinerConfig,
}

impl GMiner {
    /// Create a miner for `devices`, addressed through the indices of `pass`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::Configuration` if no device is given or a
    /// device has no index in `pass`.
    pub fn new(
        algorithm: AlgorithmType, devices: Vec<DeviceId>, pass: &GatingPass, config: MinerConfig,
    ) -> PluginResult<Self> {
        if devices.is_empty() {
            return Err(PluginError::Configuration("No devices selected".into()));
        }
        if let Some(missing) = devices.iter().find(|id| pass.device_indices.get(id).is_none()) {
            return Err(PluginError::Configuration(format!("Device {missing} has no GMiner index")));
        }

        let device_ids = pass.device_indices.devices_argument(&devices);
        Ok(Self { algorithm, devices, device_ids, config })
    }

    /// GMiner's `--algo` value for `algorithm`.
    #[must_use]
    pub fn algorithm_name(algorithm: AlgorithmType) -> &'static str {
        match algorithm {
            AlgorithmType::ZHash => "144_5",
            AlgorithmType::Beam => "150_5",
            AlgorithmType::GrinCuckaroo29 => "grin29",
            AlgorithmType::GrinCuckatoo31 => "grin31",
            AlgorithmType::CuckooCycle => "aeternity",
            AlgorithmType::Equihash96_5 => "96_5",
            AlgorithmType::Equihash192_7 => "192_7",
            AlgorithmType::Equihash210_9 => "210_9",
        }
    }

    /// Algorithm this miner runs.
    #[must_use]
    pub fn algorithm(&self) -> AlgorithmType {
        self.algorithm
    }

    /// Devices this miner runs on, in ascending id order.
    #[must_use]
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    fn command_line(&self, username: &str) -> String {
        let algo = Self::algorithm_name(self.algorithm);
        let mut command_line = format!(
            "--algo {algo} --server {} --port {} --user {username} --devices {} --watchdog 0",
            self.config.pool_host, self.config.pool_port, self.device_ids,
        );
        if !self.config.extra_launch_parameters.is_empty() {
            command_line.push(' ');
            command_line.push_str(&self.config.extra_launch_parameters);
        }
        command_line
    }

    /// Command line for a mining run with the configured user.
    #[must_use]
    pub fn mining_command_line(&self) -> String {
        self.command_line(&self.config.username)
    }

    /// Command line for a benchmark run with the demo user.
    #[must_use]
    pub fn benchmark_command_line(&self) -> String {
        self.command_line(DEMO_USER)
    }

    /// Launch spec for mining.
    #[must_use]
    pub fn mining_spec(&self) -> ProcessSpec {
        ProcessSpec::interactive(
            &self.config.binary_path,
            &self.config.working_dir,
            self.mining_command_line(),
        )
        .with_environment(self.config.environment.clone())
    }

    /// Launch spec for benchmarking.
    #[must_use]
    pub fn benchmark_spec(&self) -> ProcessSpec {
        ProcessSpec::captured(
            &self.config.binary_path,
            &self.config.working_dir,
            self.benchmark_command_line(),
        )
        .with_environment(self.config.environment.clone())
    }

    /// Start mining.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::ProcessLaunch` if the miner cannot be started.
    pub fn start_mining(&self) -> PluginResult<SupervisedProcess> {
        info!(algorithm = %self.algorithm, devices = %self.device_ids, "starting GMiner");
        self.mining_spec().spawn()
    }

    /// Benchmark this miner once.
    ///
    /// Never fails: invalid settings, launch failures, timeouts and
    /// cancellation are all reported through the outcome.
    pub async fn benchmark(
        &self, config: &BenchmarkConfig, cancel: &CancelSignal,
    ) -> BenchmarkOutcome {
        if let Err(err) = config.validate() {
            return BenchmarkOutcome::failure(BenchmarkState::Failed, err.to_string());
        }

        info!(
            algorithm = %self.algorithm,
            devices = %self.device_ids,
            timeout = ?config.timeout,
            "benchmarking GMiner"
        );
        let routine = SpeedBenchmark {
            spec:             self.benchmark_spec(),
            marker:           config.marker.clone(),
            samples_required: config.samples_required,
        };
        BenchmarkCoordinator::new(config.clone()).run(routine, cancel).await
    }
}

/// Reads captured miner output until enough speed readings are parsed.
#[derive(Debug)]
struct SpeedBenchmark {
    spec:             ProcessSpec,
    marker:           String,
    samples_required: usize,
}

impl SpeedBenchmark {
    async fn measure(self, stop: JointCancellation) -> PluginResult<(f64, bool)> {
        let mut process = self.spec.spawn()?;
        let mut output = process
            .take_output()
            .ok_or_else(|| PluginError::Benchmark("Miner output is not captured".into()))?;

        let mut samples = Vec::with_capacity(self.samples_required);
        while samples.len() < self.samples_required {
            let line = tokio::select! {
                reason = stop.triggered() => {
                    process.kill().await?;
                    return Err(PluginError::Benchmark(reason.message().into()));
                }
                line = output.next_line() => line,
            };
            let Some(line) = line else { break };

            let parsed = try_get_hashrate_after(&line, &self.marker);
            if parsed.found {
                debug!(
                    speed = %format_hash_rate(parsed.value),
                    sample = samples.len(),
                    "speed reading"
                );
                samples.push(parsed.value);
            }
        }
        process.kill().await?;

        if samples.is_empty() {
            let status = process.wait().await?;
            return Err(PluginError::Benchmark(format!(
                "Miner exited ({status}) without reporting a speed"
            )));
        }

        let speed = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok((speed, samples.len() >= self.samples_required))
    }
}

impl BenchmarkRoutine for SpeedBenchmark {
    fn execute(self, stop: JointCancellation) -> impl Future<Output = PluginResult<(f64, bool)>> {
        self.measure(stop)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        coordinator::{CANCEL_MESSAGE, CancelHandle, TIMEOUT_MESSAGE},
        process::ProcessMode,
    };

    const GB: u64 = 1024 * 1024 * 1024;

    fn plugin() -> GMinerPlugin {
        GMinerPlugin::new(MinerConfig::default().with_pool("beam.eu.example.com", 3370))
            .expect("valid config")
    }

    fn devices() -> Vec<Device> {
        vec![
            Device::cuda("gpu-b", "GTX 1080", 2, 8 * GB, 6),
            Device::cuda("gpu-a", "GTX 1050", 1, 2 * GB, 6),
            Device::cuda("gpu-old", "GTX 780", 0, 3 * GB, 3),
        ]
    }

    fn beam_miner(config: MinerConfig) -> GMiner {
        let plugin = GMinerPlugin::new(config).expect("valid config");
        let pass = plugin.supported_algorithms(&devices(), DriverVersion::new(411, 31));
        let pairs = vec![(devices()[0].clone(), Algorithm::new(GMINER_UUID, AlgorithmType::Beam))];
        plugin.create_miner(pairs, &pass).expect("miner")
    }

    #[test]
    fn test_plugin_identity() {
        let plugin = plugin();
        assert_eq!(plugin.uuid(), GMINER_UUID);
        assert_eq!(plugin.name(), "GMinerCuda9.0+");
        assert_eq!(plugin.version(), (1, 1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(GMinerPlugin::new(MinerConfig::default().with_username("")).is_err());
    }

    #[test]
    fn test_supported_algorithms() {
        let pass = plugin().supported_algorithms(&devices(), DriverVersion::new(411, 31));

        assert_eq!(pass.device_indices.get(&DeviceId::new("gpu-a")), Some(0));
        assert_eq!(pass.device_indices.get(&DeviceId::new("gpu-b")), Some(1));
        assert_eq!(pass.device_indices.get(&DeviceId::new("gpu-old")), None);

        let a: Vec<_> =
            pass.supported[&DeviceId::new("gpu-a")].iter().map(|a| a.algorithm_type).collect();
        assert_eq!(a, vec![AlgorithmType::ZHash]);
        assert_eq!(pass.supported[&DeviceId::new("gpu-b")].len(), 3);

        let old = plugin().supported_algorithms(&devices(), DriverVersion::new(375, 26));
        assert!(old.supported.is_empty());
    }

    #[test]
    fn test_create_miner_requires_single_algorithm() {
        let plugin = plugin();
        let pass = plugin.supported_algorithms(&devices(), DriverVersion::new(411, 31));
        let devices = devices();
        let beam = (devices[0].clone(), Algorithm::new(GMINER_UUID, AlgorithmType::Beam));
        let zhash = (devices[1].clone(), Algorithm::new(GMINER_UUID, AlgorithmType::ZHash));

        assert!(!plugin.can_group(&beam, &zhash));
        assert!(plugin.create_miner(vec![beam.clone(), zhash], &pass).is_err());
        assert!(plugin.create_miner(Vec::new(), &pass).is_err());

        let unindexed = (devices[2].clone(), Algorithm::new(GMINER_UUID, AlgorithmType::Beam));
        assert!(plugin.create_miner(vec![beam, unindexed], &pass).is_err());
    }

    #[test]
    fn test_command_lines() {
        let miner = beam_miner(
            MinerConfig::default()
                .with_pool("beam.eu.example.com", 3370)
                .with_username("wallet.rig1")
                .with_extra_launch_parameters("--pec 0"),
        );

        assert_eq!(miner.algorithm(), AlgorithmType::Beam);
        assert_eq!(miner.devices(), &[DeviceId::new("gpu-b")]);
        assert_eq!(
            miner.mining_command_line(),
            "--algo 150_5 --server beam.eu.example.com --port 3370 --user wallet.rig1 \
             --devices 1 --watchdog 0 --pec 0"
        );
        assert_eq!(GMiner::algorithm_name(AlgorithmType::GrinCuckaroo29), "grin29");
        assert!(miner.benchmark_command_line().contains(&format!("--user {DEMO_USER}")));
        assert_eq!(miner.mining_spec().mode, ProcessMode::Interactive);
        assert_eq!(miner.benchmark_spec().mode, ProcessMode::Captured);
    }

    #[tokio::test]
    async fn test_benchmark_launch_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner =
            beam_miner(MinerConfig::default().with_binary(dir.path().join("missing"), dir.path()));
        let config = BenchmarkConfig::new().with_pre_delay(Duration::ZERO);

        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.state, BenchmarkState::Failed);
        assert!(outcome.message.starts_with("Failed to launch"));
    }

    #[tokio::test]
    async fn test_benchmark_invalid_config() {
        let miner = beam_miner(MinerConfig::default());
        let config = BenchmarkConfig::new().with_pre_delay(Duration::ZERO).with_marker("");

        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert_eq!(outcome.state, BenchmarkState::Failed);
        assert_eq!(outcome.message, "Configuration error: Speed marker is empty");
    }

    #[cfg(unix)]
    fn fake_miner(dir: &std::path::Path, body: &str) -> MinerConfig {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("miner");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake miner");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake miner");
        MinerConfig::default().with_binary(path, dir)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_mining() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = fake_miner(dir.path(), "test \"$GMINER_TEST_ENV\" = set")
            .with_env("GMINER_TEST_ENV", "set");
        let miner = beam_miner(config);

        let mut process = miner.start_mining().expect("miner starts");
        assert!(process.take_output().is_none());
        assert!(process.wait().await.expect("wait").success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benchmark_averages_speed_readings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner = beam_miner(fake_miner(
            dir.path(),
            "echo 'GMiner v1.45'\n\
             echo 'GPU1: 27.1 Sol/s' 1>&2\n\
             echo 'Total Speed: 10 MH/s Shares Accepted: 0'\n\
             echo 'Total Speed: 20 MH/s Shares Accepted: 1'\n\
             sleep 30",
        ));
        let config = BenchmarkConfig::new()
            .with_pre_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(10))
            .with_samples_required(2);

        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert!(outcome.success, "{outcome:?}");
        assert!((outcome.speed - 15_000_000.0).abs() < 1e-3);
        assert!(outcome.message.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benchmark_survives_non_utf8_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner = beam_miner(fake_miner(
            dir.path(),
            "printf 'GPU0 58\\260C\\n'\n\
             echo 'Total Speed: 10 MH/s Shares Accepted: 0'\n\
             echo 'Total Speed: 20 MH/s Shares Accepted: 1'\n\
             sleep 30",
        ));
        let config = BenchmarkConfig::new()
            .with_pre_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(10))
            .with_samples_required(2);

        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.state, BenchmarkState::Succeeded);
        assert!((outcome.speed - 15_000_000.0).abs() < 1e-3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benchmark_without_speed_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner = beam_miner(fake_miner(dir.path(), "echo 'CUDA error: out of memory'\nexit 1"));
        let config = BenchmarkConfig::new()
            .with_pre_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(10));

        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert_eq!(outcome.state, BenchmarkState::Failed);
        assert!(outcome.message.contains("without reporting a speed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benchmark_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner = beam_miner(fake_miner(dir.path(), "sleep 30"));
        let config = BenchmarkConfig::new()
            .with_pre_delay(Duration::ZERO)
            .with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let outcome = miner.benchmark(&config, &CancelSignal::never()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.into_tuple(), (0.0, false, TIMEOUT_MESSAGE.to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_benchmark_cancelled_by_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let miner = beam_miner(fake_miner(dir.path(), "echo 'Total Speed: 1 MH/s'\nsleep 30"));
        let config = BenchmarkConfig::new()
            .with_pre_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(10))
            .with_samples_required(5);

        let handle = CancelHandle::new();
        let signal = handle.signal();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.cancel();
        });

        let outcome = miner.benchmark(&config, &signal).await;
        assert_eq!(outcome.speed, 0.0);
        assert_eq!(outcome.message, CANCEL_MESSAGE);
        assert_eq!(outcome.state, BenchmarkState::Cancelled);
    }
}
