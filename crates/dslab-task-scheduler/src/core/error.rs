//! Scheduler error types.

use thiserror::Error;

use crate::core::common::{CpuFamily, MachineId, OsVariant, TaskId, VmId};

/// Outcomes of scheduler operations that did not succeed.
///
/// None of them is fatal to the simulation: every handler consumes the error in the same event
/// and either counts it or logs it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("vm #{vm_id} ({vm_cpu}) cannot be attached to machine #{machine_id} ({machine_cpu})")]
    IncompatibleHardware {
        vm_id: VmId,
        machine_id: MachineId,
        vm_cpu: CpuFamily,
        machine_cpu: CpuFamily,
    },

    #[error("vm #{0} is migrating and does not accept tasks")]
    VmBusyMigrating(VmId),

    #[error("no compatible vm for task #{task_id} ({cpu}/{os})")]
    NoCompatibleVm { task_id: TaskId, cpu: CpuFamily, os: OsVariant },

    #[error("machine #{machine_id} memory overcommitted ({used} of {capacity} MB)")]
    CapacityExceeded { machine_id: MachineId, used: u64, capacity: u64 },

    #[error("unknown machine #{0}")]
    UnknownMachine(MachineId),

    #[error("unknown vm #{0}")]
    UnknownVm(VmId),

    #[error("unknown task #{0}")]
    UnknownTask(TaskId),

    #[error("machine #{machine_id} has no core {core}")]
    InvalidCore { machine_id: MachineId, core: u32 },

    #[error("vm #{0} is already attached to machine #{1}")]
    AlreadyAttached(VmId, MachineId),

    #[error("vm #{0} is not attached to any machine")]
    NotAttached(VmId),

    #[error("machine #{0} is not powered on")]
    MachineInactive(MachineId),

    #[error("vm #{0} is not migrating")]
    NotMigrating(VmId),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read file {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("can't parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("can't parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}
