//! Compliance counters and the end-of-run report.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::core::common::{time_to_seconds, MachineId, SlaClass, TaskId, Time};
use crate::core::engine::ClusterEngine;
use crate::core::error::SchedulerError;

/// Accumulates task, placement, SLA and memory counters.
///
/// SLA violations and memory warnings are incremented only by the corresponding engine notifications,
/// one per notification, and never decremented.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ComplianceMonitor {
    tasks_requested: u64,
    tasks_placed: u64,
    tasks_deferred: u64,
    placement_failures: u64,
    sla_violations: u64,
    memory_warnings: u64,
    last_failure: Option<String>,
    last_violation: Option<(TaskId, Time)>,
    last_memory_warning: Option<(MachineId, Time)>,
}

impl ComplianceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task_requested(&mut self) {
        self.tasks_requested += 1;
    }

    pub fn record_task_placed(&mut self) {
        self.tasks_placed += 1;
    }

    /// Task is parked until a machine wakes up.
    pub fn record_task_deferred(&mut self) {
        self.tasks_deferred += 1;
    }

    /// Task was left unscheduled.
    pub fn record_placement_failure(&mut self, error: &SchedulerError) {
        self.placement_failures += 1;
        self.last_failure = Some(error.to_string());
    }

    pub fn record_sla_violation(&mut self, task_id: TaskId, time: Time) {
        self.sla_violations += 1;
        self.last_violation = Some((task_id, time));
    }

    pub fn record_memory_warning(&mut self, machine_id: MachineId, time: Time) {
        self.memory_warnings += 1;
        self.last_memory_warning = Some((machine_id, time));
    }

    pub fn tasks_requested(&self) -> u64 {
        self.tasks_requested
    }

    pub fn tasks_placed(&self) -> u64 {
        self.tasks_placed
    }

    pub fn tasks_deferred(&self) -> u64 {
        self.tasks_deferred
    }

    pub fn placement_failures(&self) -> u64 {
        self.placement_failures
    }

    pub fn sla_violations(&self) -> u64 {
        self.sla_violations
    }

    pub fn memory_warnings(&self) -> u64 {
        self.memory_warnings
    }

    /// Description of the most recent placement failure.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Task and time of the most recent SLA violation.
    pub fn last_violation(&self) -> Option<(TaskId, Time)> {
        self.last_violation
    }

    pub fn last_memory_warning(&self) -> Option<(MachineId, Time)> {
        self.last_memory_warning
    }

    /// Builds the end-of-run report from the counters and the engine's SLA and energy figures.
    pub fn report(&self, time: Time, engine: &dyn ClusterEngine) -> SimulationReport {
        SimulationReport {
            sla_violation_percent: SlaClass::ACCOUNTED.map(|sla| engine.sla_report(sla)),
            total_energy: engine.cluster_energy(),
            run_time: time_to_seconds(time),
            tasks_requested: self.tasks_requested,
            sla_violations: self.sla_violations,
            memory_warnings: self.memory_warnings,
            placement_failures: self.placement_failures,
        }
    }
}

/// End-of-run report. Its `Display` output has a fixed layout.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Violation percentages of SLA0, SLA1 and SLA2.
    pub sla_violation_percent: [f64; 3],
    /// Energy consumed by the cluster in kW·h.
    pub total_energy: f64,
    /// Simulated run time in seconds.
    pub run_time: f64,
    pub tasks_requested: u64,
    pub sla_violations: u64,
    pub memory_warnings: u64,
    pub placement_failures: u64,
}

impl Display for SimulationReport {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        writeln!(f, "SLA violation report")?;
        for (sla, percent) in SlaClass::ACCOUNTED.iter().zip(self.sla_violation_percent.iter()) {
            writeln!(f, "{}: {}%", sla, percent)?;
        }
        writeln!(f, "Total Energy {}KW-Hour", self.total_energy)?;
        writeln!(f, "Simulation run finished in {} seconds", self.run_time)?;
        writeln!(f, "Tasks requested: {}", self.tasks_requested)?;
        writeln!(f, "SLA violations: {}", self.sla_violations)?;
        writeln!(f, "Memory warnings: {}", self.memory_warnings)?;
        writeln!(f, "Placement failures: {}", self.placement_failures)
    }
}
