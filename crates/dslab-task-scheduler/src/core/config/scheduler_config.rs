//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::core::common::{PerformanceLevel, PowerState};
use crate::core::error::ConfigError;
use crate::core::placement::placement_algorithm_resolver;
use crate::core::priority::PriorityPolicy;

/// Holds raw power controller config parsed from YAML.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
pub(crate) struct RawPowerConfig {
    pub sleep_state: Option<PowerState>,
    pub idle_checks_before_sleep: Option<u32>,
    pub idle_performance: Option<PerformanceLevel>,
    pub overcommit_checks_before_wake: Option<u32>,
    pub min_active_machines: Option<u32>,
}

/// Holds raw consolidation config parsed from YAML.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
pub(crate) struct RawConsolidationConfig {
    pub enabled: Option<bool>,
    pub underload_tasks: Option<u32>,
}

/// Holds raw scheduler config parsed from YAML.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize, Clone)]
pub(crate) struct RawSchedulerConfig {
    pub placement_algorithm: Option<String>,
    pub priority_policy: Option<String>,
    pub power: Option<RawPowerConfig>,
    pub consolidation: Option<RawConsolidationConfig>,
}

/// Power state controller settings.
#[derive(Debug, PartialEq, Clone)]
pub struct PowerConfig {
    /// State requested for machines which stayed idle long enough.
    pub sleep_state: PowerState,
    /// Number of consecutive idle periodic checks after which a machine is put to sleep (at least 2).
    pub idle_checks_before_sleep: u32,
    /// Core performance level used on machines without tasks.
    pub idle_performance: PerformanceLevel,
    /// Number of consecutive overcommitted checks after which a sleeping machine is woken up.
    pub overcommit_checks_before_wake: u32,
    /// Machines never put to sleep while fewer than this many would stay powered.
    pub min_active_machines: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sleep_state: PowerState::S3,
            idle_checks_before_sleep: 2,
            idle_performance: PerformanceLevel::P3,
            overcommit_checks_before_wake: 2,
            min_active_machines: 1,
        }
    }
}

/// VM consolidation settings.
#[derive(Debug, PartialEq, Clone)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    /// Machine with at most this many active tasks is considered underloaded.
    pub underload_tasks: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            underload_tasks: 1,
        }
    }
}

/// Represents scheduler configuration.
#[derive(Debug, PartialEq, Clone)]
pub struct SchedulerConfig {
    /// Task placement algorithm, resolved by [`placement_algorithm_resolver`].
    pub placement_algorithm: String,
    /// Priority assigned to placed tasks.
    pub priority_policy: PriorityPolicy,
    pub power: PowerConfig,
    pub consolidation: ConsolidationConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            placement_algorithm: "HeadroomFirst".to_string(),
            priority_policy: PriorityPolicy::default(),
            power: PowerConfig::default(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Creates scheduler config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Creates scheduler config from YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawSchedulerConfig = serde_yaml::from_str(content)?;
        Self::from_raw(raw)
    }

    pub(crate) fn from_raw(raw: RawSchedulerConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let raw_power = raw.power.unwrap_or_default();
        let raw_consolidation = raw.consolidation.unwrap_or_default();

        let placement_algorithm = raw.placement_algorithm.unwrap_or(defaults.placement_algorithm);
        placement_algorithm_resolver(&placement_algorithm)?;
        let priority_policy = match raw.priority_policy {
            Some(s) => s.parse()?,
            None => defaults.priority_policy,
        };

        let power = PowerConfig {
            sleep_state: raw_power.sleep_state.unwrap_or(defaults.power.sleep_state),
            idle_checks_before_sleep: raw_power
                .idle_checks_before_sleep
                .unwrap_or(defaults.power.idle_checks_before_sleep),
            idle_performance: raw_power.idle_performance.unwrap_or(defaults.power.idle_performance),
            overcommit_checks_before_wake: raw_power
                .overcommit_checks_before_wake
                .unwrap_or(defaults.power.overcommit_checks_before_wake),
            min_active_machines: raw_power.min_active_machines.unwrap_or(defaults.power.min_active_machines),
        };
        if power.sleep_state.is_active() {
            return Err(ConfigError::InvalidValue {
                name: "power.sleep_state".to_string(),
                value: power.sleep_state.to_string(),
            });
        }
        if power.idle_checks_before_sleep < 2 {
            return Err(ConfigError::InvalidValue {
                name: "power.idle_checks_before_sleep".to_string(),
                value: power.idle_checks_before_sleep.to_string(),
            });
        }

        Ok(Self {
            placement_algorithm,
            priority_policy,
            power,
            consolidation: ConsolidationConfig {
                enabled: raw_consolidation.enabled.unwrap_or(defaults.consolidation.enabled),
                underload_tasks: raw_consolidation
                    .underload_tasks
                    .unwrap_or(defaults.consolidation.underload_tasks),
            },
        })
    }
}
