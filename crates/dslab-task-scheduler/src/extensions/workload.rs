//! Task workloads: JSON traces and synthetic generator.

use std::fs::File;

use rand::prelude::*;
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::core::common::{CpuFamily, OsVariant, SlaClass, TaskId, TaskInfo};
use crate::core::config::HostConfig;
use crate::core::error::ConfigError;

/// Task submitted to the simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: TaskId,
    /// Arrival time in seconds.
    pub arrival: f64,
    /// Execution time in seconds on a dedicated core at P0.
    pub duration: f64,
    pub cpu: CpuFamily,
    pub vm: OsVariant,
    pub sla: SlaClass,
    /// Memory footprint in MB.
    pub memory: u64,
    #[serde(default)]
    pub gpu: bool,
}

impl TaskRequest {
    pub fn task_info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            required_cpu: self.cpu,
            required_vm: self.vm,
            required_sla: self.sla,
            required_memory: self.memory,
            gpu_capable: self.gpu,
        }
    }
}

/// Reads tasks from JSON file with an array of task requests. Tasks are returned in arrival order.
pub fn load_trace(file_name: &str) -> Result<Vec<TaskRequest>, ConfigError> {
    let file = File::open(file_name).map_err(|source| ConfigError::Io {
        path: file_name.to_string(),
        source,
    })?;
    let mut tasks: Vec<TaskRequest> = serde_json::from_reader(file)?;
    tasks.sort_by(|a, b| a.arrival.total_cmp(&b.arrival).then(a.id.cmp(&b.id)));
    Ok(tasks)
}

/// Generates random task workloads matching the cluster hardware.
///
/// The same seed and hosts always produce the same workload.
pub struct WorkloadGenerator {
    rng: Pcg64,
    cpus: Vec<CpuFamily>,
    max_memory: u64,
    next_id: TaskId,
}

impl WorkloadGenerator {
    /// Creates generator for tasks runnable on the given hosts.
    pub fn new(seed: u64, hosts: &[HostConfig]) -> Self {
        let mut cpus: Vec<CpuFamily> = hosts.iter().map(|host| host.cpu).collect();
        cpus.sort();
        cpus.dedup();
        let max_memory = hosts.iter().map(|host| host.memory / host.cores.max(1) as u64).min().unwrap_or(1024);
        Self {
            rng: Pcg64::seed_from_u64(seed),
            cpus,
            max_memory: max_memory.max(1),
            next_id: 0,
        }
    }

    /// Generates `count` tasks with exponential inter-arrival times of the given mean (in seconds)
    /// and durations uniformly distributed in `[min_duration, max_duration]`.
    pub fn generate(
        &mut self,
        count: usize,
        mean_interarrival: f64,
        min_duration: f64,
        max_duration: f64,
    ) -> Vec<TaskRequest> {
        let mut tasks = Vec::with_capacity(count);
        if self.cpus.is_empty() {
            return tasks;
        }
        let mut arrival = 0.;
        for _ in 0..count {
            let u: f64 = self.rng.gen_range(f64::EPSILON..1.);
            arrival += -mean_interarrival * u.ln();
            let cpu = self.cpus[self.rng.gen_range(0..self.cpus.len())];
            let images = OsVariant::seeded_for(cpu);
            let vm = images[self.rng.gen_range(0..images.len())];
            let sla = match self.rng.gen_range(0..10) {
                0 => SlaClass::Sla0,
                1..=3 => SlaClass::Sla1,
                4..=7 => SlaClass::Sla2,
                _ => SlaClass::Sla3,
            };
            let duration = if max_duration > min_duration {
                self.rng.gen_range(min_duration..max_duration)
            } else {
                min_duration
            };
            tasks.push(TaskRequest {
                id: self.next_id,
                arrival,
                duration,
                cpu,
                vm,
                sla,
                memory: self.rng.gen_range(1..=self.max_memory),
                gpu: self.rng.gen_bool(0.1),
            });
            self.next_id += 1;
        }
        tasks
    }
}
