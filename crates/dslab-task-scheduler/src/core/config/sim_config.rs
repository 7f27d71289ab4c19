//! Reference simulation configuration.

use serde::{Deserialize, Serialize};

use crate::core::common::{CpuFamily, SlaClass};
use crate::core::config::scheduler_config::{RawSchedulerConfig, SchedulerConfig};
use crate::core::error::ConfigError;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub check_period: Option<f64>,
    pub migration_duration: Option<f64>,
    pub state_change_duration: Option<f64>,
    pub vm_memory_overhead: Option<u64>,
    pub sla_slowdown: Option<SlaSlowdown>,
    pub hosts: Option<Vec<HostConfig>>,
    pub scheduler: Option<RawSchedulerConfig>,
}

/// Maximum ratio of actual to nominal task duration tolerated by each accounted SLA class.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SlaSlowdown {
    pub sla0: f64,
    pub sla1: f64,
    pub sla2: f64,
}

impl SlaSlowdown {
    /// Returns the tolerated slowdown, `None` for classes without violation accounting.
    pub fn limit(&self, sla: SlaClass) -> Option<f64> {
        match sla {
            SlaClass::Sla0 => Some(self.sla0),
            SlaClass::Sla1 => Some(self.sla1),
            SlaClass::Sla2 => Some(self.sla2),
            SlaClass::Sla3 => None,
        }
    }
}

impl Default for SlaSlowdown {
    fn default() -> Self {
        Self {
            sla0: 1.2,
            sla1: 1.5,
            sla2: 2.0,
        }
    }
}

/// Holds configuration of a single machine or a set of identical machines.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostConfig {
    pub cpu: CpuFamily,
    /// Number of cores.
    pub cores: u32,
    /// Memory capacity in MB.
    pub memory: u64,
    /// Whether the machine has GPUs.
    pub gpus: Option<bool>,
    /// Number of such machines.
    pub count: Option<u32>,
    /// Power consumption in watts of a fully loaded machine.
    pub max_power: Option<f64>,
    /// Power consumption in watts of a powered machine without load.
    pub idle_power: Option<f64>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Clone)]
pub struct SimulationConfig {
    /// Period in seconds between scheduler checks.
    pub check_period: f64,
    /// VM migration duration in seconds.
    pub migration_duration: f64,
    /// Machine power state transition duration in seconds.
    pub state_change_duration: f64,
    /// Memory in MB consumed by each attached VM on top of its tasks.
    pub vm_memory_overhead: u64,
    pub sla_slowdown: SlaSlowdown,
    /// Configurations of machines.
    pub hosts: Vec<HostConfig>,
    pub scheduler: SchedulerConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            check_period: 1.,
            migration_duration: 0.5,
            state_change_duration: 0.2,
            vm_memory_overhead: 0,
            sla_slowdown: SlaSlowdown::default(),
            hosts: Vec::new(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content)?;
        let defaults = Self::default();
        let check_period = raw.check_period.unwrap_or(defaults.check_period);
        if check_period <= 0. {
            return Err(ConfigError::InvalidValue {
                name: "check_period".to_string(),
                value: check_period.to_string(),
            });
        }
        Ok(Self {
            check_period,
            migration_duration: raw.migration_duration.unwrap_or(defaults.migration_duration),
            state_change_duration: raw.state_change_duration.unwrap_or(defaults.state_change_duration),
            vm_memory_overhead: raw.vm_memory_overhead.unwrap_or(defaults.vm_memory_overhead),
            sla_slowdown: raw.sla_slowdown.unwrap_or_default(),
            hosts: raw.hosts.unwrap_or_default(),
            scheduler: SchedulerConfig::from_raw(raw.scheduler.unwrap_or_default())?,
        })
    }
}
