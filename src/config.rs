/// Simulator configuration, loaded from TOML.
/// Every field has a default, so an empty file (or no file) yields an
/// Evergreen-like device running a small vector kernel.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::isa::InstKind;
use crate::ndrange::Dim3;
use crate::scheduler::PlacementPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub kernel: KernelConfig,
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(text)?;
        config.device.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_num_compute_units")]
    pub num_compute_units: usize,
    /// Lanes per compute unit
    #[serde(default = "default_num_stream_cores")]
    pub num_stream_cores: usize,
    #[serde(default = "default_wavefront_size")]
    pub wavefront_size: u32,
    /// Largest work-group (in work-items) a compute unit accepts
    #[serde(default = "default_max_work_group_size")]
    pub max_work_group_size: u32,
    #[serde(default)]
    pub placement: PlacementPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            num_compute_units: default_num_compute_units(),
            num_stream_cores: default_num_stream_cores(),
            wavefront_size: default_wavefront_size(),
            max_work_group_size: default_max_work_group_size(),
            placement: PlacementPolicy::default(),
        }
    }
}

impl DeviceConfig {
    pub fn new(num_compute_units: usize, num_stream_cores: usize) -> Self {
        DeviceConfig {
            num_compute_units,
            num_stream_cores,
            ..Default::default()
        }
    }

    pub fn with_wavefront_size(mut self, wavefront_size: u32) -> Self {
        self.wavefront_size = wavefront_size;
        self
    }

    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    /// Checked before any device is built.
    pub fn validate(&self) -> Result<()> {
        if self.num_compute_units == 0 {
            return Err(SimError::InvalidConfig("device needs at least one compute unit".into()));
        }
        if self.num_stream_cores == 0 {
            return Err(SimError::InvalidConfig("compute units need at least one stream core".into()));
        }
        if self.wavefront_size == 0 || self.wavefront_size as usize % self.num_stream_cores != 0 {
            return Err(SimError::InvalidConfig(format!(
                "wavefront size {} is not a multiple of {} stream cores",
                self.wavefront_size, self.num_stream_cores
            )));
        }
        if self.max_work_group_size == 0 {
            return Err(SimError::InvalidConfig("max work-group size is zero".into()));
        }
        Ok(())
    }

    /// Sub-wavefronts a full wavefront is split into by the stream cores.
    pub fn subwavefronts_per_wavefront(&self) -> u32 {
        self.wavefront_size / self.num_stream_cores as u32
    }
}

fn default_num_compute_units() -> usize {
    20
}
fn default_num_stream_cores() -> usize {
    16
}
fn default_wavefront_size() -> u32 {
    64
}
fn default_max_work_group_size() -> u32 {
    256
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_l2_hit_latency")]
    pub l2_hit_latency: u64,
    #[serde(default = "default_hbm_latency")]
    pub hbm_latency: u64,
    #[serde(default = "default_l2_lines")]
    pub l2_lines: usize,
    #[serde(default = "default_line_size")]
    pub line_size: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            l2_hit_latency: default_l2_hit_latency(),
            hbm_latency: default_hbm_latency(),
            l2_lines: default_l2_lines(),
            line_size: default_line_size(),
        }
    }
}

fn default_l2_hit_latency() -> u64 {
    20
}
fn default_hbm_latency() -> u64 {
    200
}
fn default_l2_lines() -> usize {
    4096
}
fn default_line_size() -> u64 {
    64
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stop after this many cycles, leaving in-flight work suspended
    #[serde(default)]
    pub max_cycles: Option<u64>,
    /// Cycles between live metrics snapshots (0 = off)
    #[serde(default)]
    pub metrics_interval: u64,
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default = "default_kernel_name")]
    pub name: String,
    #[serde(default = "default_global_size")]
    pub global_size: [u32; 3],
    #[serde(default = "default_local_size")]
    pub local_size: [u32; 3],
    /// Straight-line program every wavefront runs
    #[serde(default = "default_program")]
    pub program: Vec<InstKind>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            name: default_kernel_name(),
            global_size: default_global_size(),
            local_size: default_local_size(),
            program: default_program(),
        }
    }
}

impl KernelConfig {
    pub fn global(&self) -> Dim3 {
        Dim3::from(self.global_size)
    }

    pub fn local(&self) -> Dim3 {
        Dim3::from(self.local_size)
    }
}

fn default_kernel_name() -> String {
    "vec_add".to_string()
}
fn default_global_size() -> [u32; 3] {
    [4096, 1, 1]
}
fn default_local_size() -> [u32; 3] {
    [256, 1, 1]
}
fn default_program() -> Vec<InstKind> {
    vec![InstKind::Load, InstKind::Load, InstKind::Alu, InstKind::Store]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = SimConfig::from_toml_str("").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.device.num_compute_units, 20);
        assert_eq!(config.device.subwavefronts_per_wavefront(), 4);
        assert_eq!(config.kernel.program.len(), 4);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = SimConfig::from_toml_str(
            r#"
            [device]
            num_compute_units = 4
            placement = "round-robin"

            [run]
            max_cycles = 1000

            [kernel]
            global_size = [128, 2, 1]
            local_size = [64, 1, 1]
            program = ["alu", "load", "alu"]
            "#,
        )
        .unwrap();
        assert_eq!(config.device.num_compute_units, 4);
        assert_eq!(config.device.num_stream_cores, 16);
        assert_eq!(config.device.placement, PlacementPolicy::RoundRobin);
        assert_eq!(config.run.max_cycles, Some(1000));
        assert_eq!(config.kernel.global(), Dim3::new(128, 2, 1));
        assert_eq!(config.kernel.program, vec![InstKind::Alu, InstKind::Load, InstKind::Alu]);
        assert_eq!(config.memory, MemoryConfig::default());
    }

    #[test]
    fn rejects_zero_compute_units() {
        let err = SimConfig::from_toml_str("[device]\nnum_compute_units = 0\n").unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_wavefront_not_multiple_of_stream_cores() {
        assert!(DeviceConfig::new(2, 16).with_wavefront_size(40).validate().is_err());
        assert!(DeviceConfig::new(2, 8).with_wavefront_size(40).validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SimConfig::from_toml_str("[device\n").unwrap_err();
        assert!(matches!(err, SimError::ConfigParse(_)));
    }
}
