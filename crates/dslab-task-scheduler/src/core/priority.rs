//! Priority assignment for placed tasks.

use std::str::FromStr;

use crate::core::common::{Priority, SlaClass, TaskInfo};
use crate::core::config::options::{parse_config_value, parse_options};
use crate::core::error::ConfigError;

/// Decides the priority a task gets inside its VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PriorityPolicy {
    /// Every task gets the same priority.
    Fixed(Priority),
    /// SLA0 and SLA1 tasks get high priority, SLA2 mid, SLA3 low.
    BySla,
}

impl PriorityPolicy {
    pub fn priority_for(&self, task: &TaskInfo) -> Priority {
        match self {
            PriorityPolicy::Fixed(priority) => *priority,
            PriorityPolicy::BySla => match task.required_sla {
                SlaClass::Sla0 | SlaClass::Sla1 => Priority::High,
                SlaClass::Sla2 => Priority::Mid,
                SlaClass::Sla3 => Priority::Low,
            },
        }
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        PriorityPolicy::Fixed(Priority::High)
    }
}

impl FromStr for PriorityPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            name: "priority_policy".to_string(),
            value: s.to_string(),
        };
        let (name, options) = parse_config_value(s);
        match name.as_str() {
            "BySla" => Ok(PriorityPolicy::BySla),
            "Fixed" => {
                let options = parse_options(&options.unwrap_or_default());
                let priority = match options.get("priority").map(|p| p.as_str()) {
                    None | Some("HIGH") => Priority::High,
                    Some("MID") => Priority::Mid,
                    Some("LOW") => Priority::Low,
                    Some(_) => return Err(invalid()),
                };
                Ok(PriorityPolicy::Fixed(priority))
            }
            _ => Err(invalid()),
        }
    }
}
