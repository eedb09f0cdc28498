//! CUDA device capability gating.
//!
//! Decides which algorithms each device can run and assigns the dense,
//! bus-ordered device indices the miner binary uses in `--devices`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::{Algorithm, AlgorithmType, Device, DeviceId, DeviceKind, DriverVersion};

/// Minimum installed NVIDIA driver (CUDA 9.0).
pub const MIN_DRIVER_VERSION: DriverVersion = DriverVersion::new(384, 0);
/// Minimum CUDA compute capability major version (SM 5.0).
pub const MIN_SM_MAJOR: u32 = 5;

/// ~1.75GB.
const MIN_ZHASH_MEMORY: u64 = 1_879_047_230;
/// ~2.9GB.
const MIN_BEAM_MEMORY: u64 = 3_113_849_695;
/// ~5.6GB.
const MIN_GRIN_CUCKAROO29_MEMORY: u64 = 6_012_951_136;

/// A device gains `algorithm` when its memory is strictly above `min_memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityRule {
    /// Memory threshold in bytes (exclusive).
    pub min_memory: u64,
    /// Algorithm granted by this rule.
    pub algorithm:  AlgorithmType,
}

impl CapabilityRule {
    /// Whether `device` satisfies this rule. Unknown memory never matches.
    #[must_use]
    pub fn matches(&self, device: &Device) -> bool {
        device.memory_bytes.is_some_and(|memory| memory > self.min_memory)
    }
}

/// Gating rule table for one miner binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRules {
    /// Driver versions below this disable every device.
    pub min_driver:   DriverVersion,
    /// Devices below this compute capability are ignored.
    pub min_sm_major: u32,
    /// Memory rules, evaluated independently in order.
    pub rules:        Vec<CapabilityRule>,
}

impl CapabilityRules {
    /// GMiner requirements.
    #[must_use]
    pub fn gminer() -> Self {
        Self {
            min_driver:   MIN_DRIVER_VERSION,
            min_sm_major: MIN_SM_MAJOR,
            rules:        vec![
                CapabilityRule { min_memory: MIN_ZHASH_MEMORY, algorithm: AlgorithmType::ZHash },
                CapabilityRule { min_memory: MIN_BEAM_MEMORY, algorithm: AlgorithmType::Beam },
                CapabilityRule {
                    min_memory: MIN_GRIN_CUCKAROO29_MEMORY,
                    algorithm:  AlgorithmType::GrinCuckaroo29,
                },
            ],
        }
    }

    fn is_capable(&self, device: &Device) -> bool {
        device.kind == DeviceKind::Cuda
            && device.sm_major.is_some_and(|major| major >= self.min_sm_major)
    }

    /// Algorithms `device` qualifies for, in rule-table order.
    pub fn algorithms_for(&self, device: &Device, plugin_uuid: &str) -> Vec<Algorithm> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(device))
            .map(|rule| Algorithm::new(plugin_uuid, rule.algorithm))
            .collect()
    }

    /// Gate `devices` against this rule table.
    ///
    /// Returns an empty pass when `driver` is below the minimum. Otherwise
    /// every capable device receives an index in ascending bus order, even
    /// when no memory rule matches it; only devices with at least one
    /// algorithm appear in [`GatingPass::supported`].
    pub fn supported_algorithms(
        &self, devices: &[Device], driver: DriverVersion, plugin_uuid: &str,
    ) -> GatingPass {
        let mut pass = GatingPass::default();
        if driver < self.min_driver {
            debug!(%driver, min = %self.min_driver, "driver below minimum, no devices supported");
            return pass;
        }

        let mut capable: Vec<&Device> = devices.iter().filter(|d| self.is_capable(d)).collect();
        capable.sort_by_key(|d| d.pcie_bus_id);

        for (index, device) in capable.into_iter().enumerate() {
            pass.device_indices.insert(device.id.clone(), index);
            let algorithms = self.algorithms_for(device, plugin_uuid);
            debug!(device = %device.id, index, count = algorithms.len(), "gated device");
            if !algorithms.is_empty() {
                pass.supported.insert(device.id.clone(), algorithms);
            }
        }

        pass
    }
}

impl Default for CapabilityRules {
    fn default() -> Self {
        Self::gminer()
    }
}

/// Device id to miner-binary index, rebuilt on every gating pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIndexMap {
    indices: BTreeMap<DeviceId, usize>,
}

impl DeviceIndexMap {
    fn insert(&mut self, id: DeviceId, index: usize) {
        self.indices.insert(id, index);
    }

    /// Index assigned to `id`.
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<usize> {
        self.indices.get(id).copied()
    }

    /// Number of indexed devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether no device was indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate `(device, index)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, usize)> {
        self.indices.iter().map(|(id, index)| (id, *index))
    }

    /// Value for the miner's `--devices` argument: mapped indices of `ids`
    /// in ascending order, space separated. Unknown ids are skipped.
    pub fn devices_argument<'a>(&self, ids: impl IntoIterator<Item = &'a DeviceId>) -> String {
        let mut mapped: Vec<usize> = ids.into_iter().filter_map(|id| self.get(id)).collect();
        mapped.sort_unstable();
        mapped.dedup();
        mapped.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
    }
}

/// Result of one gating pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatingPass {
    /// Supported algorithms per device. Devices with none are absent.
    pub supported:      BTreeMap<DeviceId, Vec<Algorithm>>,
    /// Indices for every capable device.
    pub device_indices: DeviceIndexMap,
}

/// The one algorithm type shared by every pair, if there is exactly one.
pub fn algorithm_single_type<'a>(
    pairs: impl IntoIterator<Item = &'a (Device, Algorithm)>,
) -> Option<AlgorithmType> {
    let mut single = None;
    for (_, algorithm) in pairs {
        match single {
            None => single = Some(algorithm.algorithm_type),
            Some(t) if t != algorithm.algorithm_type => return None,
            Some(_) => {}
        }
    }
    single
}

/// Device ids of `pairs` in ascending order.
pub fn device_ids_in_order<'a>(
    pairs: impl IntoIterator<Item = &'a (Device, Algorithm)>,
) -> Vec<DeviceId> {
    let mut ids: Vec<DeviceId> = pairs.into_iter().map(|(device, _)| device.id.clone()).collect();
    ids.sort();
    ids
}

/// Two pairs can share one miner process when they run the same algorithm.
#[must_use]
pub fn can_group(a: &(Device, Algorithm), b: &(Device, Algorithm)) -> bool {
    a.1.algorithm_type == b.1.algorithm_type
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "test-plugin";
    const GB: u64 = 1024 * 1024 * 1024;

    fn gpu(id: &str, bus: u32, memory: u64, sm: u32) -> Device {
        Device::cuda(id, format!("GPU {id}"), bus, memory, sm)
    }

    fn types(algorithms: &[Algorithm]) -> Vec<AlgorithmType> {
        algorithms.iter().map(|a| a.algorithm_type).collect()
    }

    #[test]
    fn test_old_driver_disables_everything() {
        let rules = CapabilityRules::gminer();
        let devices = vec![gpu("a", 1, 8 * GB, 6), gpu("b", 2, 8 * GB, 7)];

        for driver in [DriverVersion::new(0, 0), DriverVersion::new(383, 99)] {
            let pass = rules.supported_algorithms(&devices, driver, UUID);
            assert!(pass.supported.is_empty());
            assert!(pass.device_indices.is_empty());
        }
    }

    #[test]
    fn test_empty_device_list() {
        let pass = CapabilityRules::gminer().supported_algorithms(&[], MIN_DRIVER_VERSION, UUID);
        assert!(pass.supported.is_empty());
        assert!(pass.device_indices.is_empty());
    }

    #[test]
    fn test_low_compute_capability_excluded() {
        let devices = vec![gpu("old", 0, 8 * GB, 3), gpu("new", 5, 8 * GB, 5)];
        let pass =
            CapabilityRules::gminer().supported_algorithms(&devices, DriverVersion::new(411, 0), UUID);

        let old = DeviceId::new("old");
        assert!(!pass.supported.contains_key(&old));
        assert_eq!(pass.device_indices.get(&old), None);
        assert_eq!(pass.device_indices.get(&DeviceId::new("new")), Some(0));
    }

    #[test]
    fn test_non_cuda_and_unknown_attributes_excluded() {
        let mut amd = gpu("amd", 0, 8 * GB, 6);
        amd.kind = DeviceKind::Amd;
        let mut unknown_sm = gpu("nosm", 1, 8 * GB, 6);
        unknown_sm.sm_major = None;
        let mut unknown_mem = gpu("nomem", 2, 8 * GB, 6);
        unknown_mem.memory_bytes = None;

        let pass = CapabilityRules::gminer().supported_algorithms(
            &[amd, unknown_sm, unknown_mem],
            MIN_DRIVER_VERSION,
            UUID,
        );

        assert!(pass.supported.is_empty());
        // Memory is not needed for an index, only compute capability.
        assert_eq!(pass.device_indices.len(), 1);
        assert_eq!(pass.device_indices.get(&DeviceId::new("nomem")), Some(0));
    }

    #[test]
    fn test_indices_dense_and_bus_ordered() {
        let devices = vec![
            gpu("c", 30, 8 * GB, 6),
            gpu("a", 7, 8 * GB, 6),
            gpu("skip", 1, 8 * GB, 3),
            gpu("b", 12, GB, 6),
        ];
        let pass =
            CapabilityRules::gminer().supported_algorithms(&devices, MIN_DRIVER_VERSION, UUID);

        let indexed: Vec<(String, usize)> =
            pass.device_indices.iter().map(|(id, i)| (id.0.clone(), i)).collect();
        assert_eq!(
            indexed,
            vec![("a".to_string(), 0), ("b".to_string(), 1), ("c".to_string(), 2)]
        );

        // "b" has too little memory for any algorithm but still holds index 1.
        assert!(!pass.supported.contains_key(&DeviceId::new("b")));
    }

    #[test]
    fn test_memory_thresholds_are_strict() {
        let devices = vec![
            gpu("eq_zhash", 0, MIN_ZHASH_MEMORY, 6),
            gpu("zhash", 1, MIN_ZHASH_MEMORY + 1, 6),
            gpu("eq_beam", 2, MIN_BEAM_MEMORY, 6),
            gpu("beam", 3, MIN_BEAM_MEMORY + 1, 6),
            gpu("grin", 4, MIN_GRIN_CUCKAROO29_MEMORY + 1, 6),
        ];
        let pass =
            CapabilityRules::gminer().supported_algorithms(&devices, MIN_DRIVER_VERSION, UUID);
        let get = |id: &str| pass.supported.get(&DeviceId::new(id)).map(|a| types(a));

        assert_eq!(get("eq_zhash"), None);
        assert_eq!(get("zhash"), Some(vec![AlgorithmType::ZHash]));
        assert_eq!(get("eq_beam"), Some(vec![AlgorithmType::ZHash]));
        assert_eq!(get("beam"), Some(vec![AlgorithmType::ZHash, AlgorithmType::Beam]));
        assert_eq!(
            get("grin"),
            Some(vec![AlgorithmType::ZHash, AlgorithmType::Beam, AlgorithmType::GrinCuckaroo29])
        );
    }

    #[test]
    fn test_algorithms_owned_by_plugin() {
        let pass = CapabilityRules::gminer().supported_algorithms(
            &[gpu("a", 0, 8 * GB, 7)],
            MIN_DRIVER_VERSION,
            UUID,
        );
        let algorithms = &pass.supported[&DeviceId::new("a")];
        assert!(algorithms.iter().all(|a| a.plugin_uuid == UUID));
    }

    #[test]
    fn test_devices_argument() {
        let devices = vec![gpu("x", 9, 8 * GB, 6), gpu("y", 3, 8 * GB, 6), gpu("z", 5, 8 * GB, 6)];
        let pass =
            CapabilityRules::gminer().supported_algorithms(&devices, MIN_DRIVER_VERSION, UUID);
        let ids = [DeviceId::new("x"), DeviceId::new("y"), DeviceId::new("missing")];
        assert_eq!(pass.device_indices.devices_argument(&ids), "0 2");
    }

    #[test]
    fn test_toolkit_helpers() {
        let beam = Algorithm::new(UUID, AlgorithmType::Beam);
        let zhash = Algorithm::new(UUID, AlgorithmType::ZHash);
        let a = (gpu("b", 0, 8 * GB, 6), beam.clone());
        let b = (gpu("a", 1, 8 * GB, 6), beam);
        let c = (gpu("c", 2, 8 * GB, 6), zhash);

        assert_eq!(algorithm_single_type(&[a.clone(), b.clone()]), Some(AlgorithmType::Beam));
        assert_eq!(algorithm_single_type(&[a.clone(), c.clone()]), None);
        assert_eq!(algorithm_single_type(&Vec::<(Device, Algorithm)>::new()), None);

        assert_eq!(device_ids_in_order(&[a.clone(), b.clone()]), vec![
            DeviceId::new("a"),
            DeviceId::new("b")
        ]);

        assert!(can_group(&a, &b));
        assert!(!can_group(&a, &c));
    }
}
