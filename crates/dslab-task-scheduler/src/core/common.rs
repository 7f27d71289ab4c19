//! Identifiers, hardware/software classes and descriptors shared by all components.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

pub type MachineId = u32;
pub type VmId = u32;
pub type TaskId = u32;

/// Simulated time in microseconds.
pub type Time = u64;

/// Number of time units in one second.
pub const TIME_UNITS_PER_SECOND: f64 = 1_000_000.;

/// Converts seconds to simulated time units.
pub fn seconds_to_time(seconds: f64) -> Time {
    (seconds * TIME_UNITS_PER_SECOND).round().max(0.) as Time
}

/// Converts simulated time units to seconds.
pub fn time_to_seconds(time: Time) -> f64 {
    time as f64 / TIME_UNITS_PER_SECOND
}

/// Hardware instruction set family of a machine. VMs are bound to the family they were created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CpuFamily {
    Arm,
    Power,
    RiscV,
    X86,
}

impl Display for CpuFamily {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CpuFamily::Arm => write!(f, "ARM"),
            CpuFamily::Power => write!(f, "POWER"),
            CpuFamily::RiscV => write!(f, "RISC_V"),
            CpuFamily::X86 => write!(f, "X86"),
        }
    }
}

/// Guest operating system image of a VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OsVariant {
    Linux,
    LinuxRt,
    Win,
    Aix,
}

impl Display for OsVariant {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OsVariant::Linux => write!(f, "LINUX"),
            OsVariant::LinuxRt => write!(f, "LINUX_RT"),
            OsVariant::Win => write!(f, "WIN"),
            OsVariant::Aix => write!(f, "AIX"),
        }
    }
}

impl OsVariant {
    /// Returns the VM images seeded on every machine of the given CPU family at cluster initialization.
    pub fn seeded_for(cpu: CpuFamily) -> Vec<OsVariant> {
        let mut result = vec![OsVariant::Linux, OsVariant::LinuxRt];
        match cpu {
            CpuFamily::Arm | CpuFamily::X86 => result.push(OsVariant::Win),
            CpuFamily::Power => result.push(OsVariant::Aix),
            CpuFamily::RiscV => {}
        }
        result
    }
}

/// Service level class of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaClass {
    Sla0,
    Sla1,
    Sla2,
    Sla3,
}

impl SlaClass {
    /// Classes which are part of violation accounting (SLA3 is best effort).
    pub const ACCOUNTED: [SlaClass; 3] = [SlaClass::Sla0, SlaClass::Sla1, SlaClass::Sla2];

    pub fn is_accounted(&self) -> bool {
        *self != SlaClass::Sla3
    }
}

impl Display for SlaClass {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SlaClass::Sla0 => write!(f, "SLA0"),
            SlaClass::Sla1 => write!(f, "SLA1"),
            SlaClass::Sla2 => write!(f, "SLA2"),
            SlaClass::Sla3 => write!(f, "SLA3"),
        }
    }
}

/// Execution priority of a task inside its VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Mid,
    Low,
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Mid => write!(f, "MID"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// Machine power state, from fully powered (S0) to fully off (S5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerState {
    S0,
    S0i1,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl PowerState {
    /// Only fully powered machines execute tasks.
    pub fn is_active(&self) -> bool {
        *self == PowerState::S0
    }
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Core frequency/voltage operating point, P0 being the fastest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PerformanceLevel {
    P0,
    P1,
    P2,
    P3,
}

impl PerformanceLevel {
    /// Relative core speed used by the reference machine model.
    pub fn speed_factor(&self) -> f64 {
        match self {
            PerformanceLevel::P0 => 1.,
            PerformanceLevel::P1 => 0.8,
            PerformanceLevel::P2 => 0.6,
            PerformanceLevel::P3 => 0.4,
        }
    }
}

impl Display for PerformanceLevel {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Task requirements as reported by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub required_cpu: CpuFamily,
    pub required_vm: OsVariant,
    pub required_sla: SlaClass,
    /// Memory footprint in MB.
    pub required_memory: u64,
    pub gpu_capable: bool,
}

/// Machine properties and current state as reported by the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub cpu: CpuFamily,
    pub num_cores: u32,
    /// Memory capacity in MB.
    pub memory_size: u64,
    pub memory_used: u64,
    pub gpus: bool,
    pub s_state: PowerState,
    pub active_tasks: u32,
    pub active_vms: u32,
}

/// VM properties and current state as reported by the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VmInfo {
    pub id: VmId,
    pub vm_type: OsVariant,
    pub cpu: CpuFamily,
    pub machine_id: Option<MachineId>,
    pub active_tasks: Vec<TaskId>,
}
