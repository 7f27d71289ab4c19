//! Scheduler and simulation configuration.

pub mod options;
pub mod scheduler_config;
pub mod sim_config;

pub use scheduler_config::{ConsolidationConfig, PowerConfig, SchedulerConfig};
pub use sim_config::{HostConfig, SimulationConfig, SlaSlowdown};
