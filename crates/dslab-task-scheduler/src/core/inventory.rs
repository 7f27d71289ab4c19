//! Cluster inventory: machines, VMs and their attachment state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::core::common::{
    CpuFamily, MachineId, MachineInfo, OsVariant, PerformanceLevel, PowerState, TaskId, TaskInfo, VmId,
};
use crate::core::error::{SchedulerError, SchedulerResult};

/// Relocation state of a VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MigrationStatus {
    Idle,
    /// Migration requested, VM still runs on its source machine.
    MigratingOut { destination: MachineId },
    /// VM left its source machine and is being attached to the destination.
    MigratingIn { source: MachineId },
}

impl MigrationStatus {
    pub fn is_idle(&self) -> bool {
        *self == MigrationStatus::Idle
    }
}

/// Physical machine record.
#[derive(Clone, Debug, Serialize)]
pub struct Machine {
    pub id: MachineId,
    pub cpu: CpuFamily,
    pub gpus: bool,
    pub memory_total: u64,
    pub num_cores: u32,
    pub core_performance: Vec<PerformanceLevel>,
    pub power_state: PowerState,
    /// State requested from the engine and not acknowledged yet.
    pub pending_power_state: Option<PowerState>,
    pub vms: BTreeSet<VmId>,
    pub memory_used: u64,
    pub active_tasks: u32,
}

impl Machine {
    fn new(info: &MachineInfo) -> Self {
        Self {
            id: info.id,
            cpu: info.cpu,
            gpus: info.gpus,
            memory_total: info.memory_size,
            num_cores: info.num_cores,
            core_performance: vec![PerformanceLevel::P0; info.num_cores as usize],
            power_state: info.s_state,
            pending_power_state: None,
            vms: BTreeSet::new(),
            memory_used: 0,
            active_tasks: 0,
        }
    }

    /// Machine is fully powered and no transition is in flight.
    pub fn accepts_tasks(&self) -> bool {
        self.power_state.is_active() && self.pending_power_state.is_none()
    }

    /// Machine still has an idle core.
    pub fn has_headroom(&self) -> bool {
        self.active_tasks < self.num_cores
    }

    pub fn is_overcommitted(&self) -> bool {
        self.memory_used > self.memory_total
    }

    /// Compares memory utilization ratios by cross-multiplication, without division.
    /// Returns true only if this machine is strictly less utilized than `other`.
    pub fn less_utilized_than(&self, other: &Machine) -> bool {
        (self.memory_used as u128) * (other.memory_total as u128)
            < (other.memory_used as u128) * (self.memory_total as u128)
    }
}

/// Virtual machine record.
#[derive(Clone, Debug, Serialize)]
pub struct VirtualMachine {
    pub id: VmId,
    pub os: OsVariant,
    pub cpu: CpuFamily,
    pub machine: Option<MachineId>,
    pub migration: MigrationStatus,
    /// Assigned tasks in assignment order.
    pub tasks: Vec<TaskId>,
}

impl VirtualMachine {
    pub fn matches(&self, cpu: CpuFamily, os: OsVariant) -> bool {
        self.cpu == cpu && self.os == os
    }
}

#[derive(Clone, Debug)]
struct TaskBinding {
    vm_id: VmId,
    memory: u64,
}

/// Stores machine and VM records and keeps the derived counters consistent with attachments.
///
/// Machines and VMs are enumerated in ID order, which makes every scan over the inventory deterministic.
#[derive(Clone, Default)]
pub struct ClusterInventory {
    machines: BTreeMap<MachineId, Machine>,
    vms: BTreeMap<VmId, VirtualMachine>,
    tasks: HashMap<TaskId, TaskBinding>,
}

impl ClusterInventory {
    /// Creates empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds machine described by the engine. Re-registering a machine resets its record.
    pub fn register_machine(&mut self, info: &MachineInfo) {
        self.machines.insert(info.id, Machine::new(info));
    }

    /// Records a VM created by the engine. The VM is unattached.
    pub fn create_vm(&mut self, vm_id: VmId, os: OsVariant, cpu: CpuFamily) -> VmId {
        self.vms.insert(
            vm_id,
            VirtualMachine {
                id: vm_id,
                os,
                cpu,
                machine: None,
                migration: MigrationStatus::Idle,
                tasks: Vec::new(),
            },
        );
        vm_id
    }

    /// Attaches VM to machine. Load of the tasks already running in the VM moves to the machine.
    pub fn attach(&mut self, vm_id: VmId, machine_id: MachineId) -> SchedulerResult<()> {
        let vm = self.vms.get(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))?;
        let machine = self
            .machines
            .get(&machine_id)
            .ok_or(SchedulerError::UnknownMachine(machine_id))?;
        if let Some(current) = vm.machine {
            return Err(SchedulerError::AlreadyAttached(vm_id, current));
        }
        if vm.cpu != machine.cpu {
            return Err(SchedulerError::IncompatibleHardware {
                vm_id,
                machine_id,
                vm_cpu: vm.cpu,
                machine_cpu: machine.cpu,
            });
        }

        let (memory, count) = self.vm_load(vm_id);
        let machine = self.machine_mut(machine_id)?;
        machine.vms.insert(vm_id);
        machine.memory_used += memory;
        machine.active_tasks += count;
        self.vm_mut(vm_id)?.machine = Some(machine_id);
        Ok(())
    }

    /// Detaches VM from its machine and returns the machine ID.
    pub fn detach(&mut self, vm_id: VmId) -> SchedulerResult<MachineId> {
        let vm = self.vms.get(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))?;
        let machine_id = vm.machine.ok_or(SchedulerError::NotAttached(vm_id))?;

        let (memory, count) = self.vm_load(vm_id);
        if let Some(machine) = self.machines.get_mut(&machine_id) {
            machine.vms.remove(&vm_id);
            machine.memory_used = machine.memory_used.saturating_sub(memory);
            machine.active_tasks = machine.active_tasks.saturating_sub(count);
        }
        self.vm_mut(vm_id)?.machine = None;
        Ok(machine_id)
    }

    /// Binds task to VM and charges its memory to the VM's machine.
    pub fn record_task_assigned(&mut self, vm_id: VmId, task: &TaskInfo) -> SchedulerResult<()> {
        let vm = self.vms.get_mut(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))?;
        if !vm.migration.is_idle() {
            return Err(SchedulerError::VmBusyMigrating(vm_id));
        }
        let machine_id = vm.machine.ok_or(SchedulerError::NotAttached(vm_id))?;

        vm.tasks.push(task.id);
        self.tasks.insert(
            task.id,
            TaskBinding {
                vm_id,
                memory: task.required_memory,
            },
        );
        if let Some(machine) = self.machines.get_mut(&machine_id) {
            machine.memory_used += task.required_memory;
            machine.active_tasks += 1;
        }
        Ok(())
    }

    /// Removes finished task from VM and releases its load.
    pub fn record_task_completed(&mut self, vm_id: VmId, task_id: TaskId) -> SchedulerResult<()> {
        let binding = match self.tasks.remove(&task_id) {
            Some(binding) if binding.vm_id == vm_id => binding,
            Some(binding) => {
                self.tasks.insert(task_id, binding);
                return Err(SchedulerError::UnknownTask(task_id));
            }
            None => return Err(SchedulerError::UnknownTask(task_id)),
        };
        let vm = self.vms.get_mut(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))?;
        vm.tasks.retain(|id| *id != task_id);
        if let Some(machine) = vm.machine.and_then(|id| self.machines.get_mut(&id)) {
            machine.memory_used = machine.memory_used.saturating_sub(binding.memory);
            machine.active_tasks = machine.active_tasks.saturating_sub(1);
        }
        Ok(())
    }

    /// Returns the VM running the specified task.
    pub fn vm_of_task(&self, task_id: TaskId) -> SchedulerResult<VmId> {
        self.tasks
            .get(&task_id)
            .map(|binding| binding.vm_id)
            .ok_or(SchedulerError::UnknownTask(task_id))
    }

    /// Applies an acknowledged power state. Clears the pending request.
    pub fn set_machine_power_state(&mut self, machine_id: MachineId, state: PowerState) -> SchedulerResult<()> {
        let machine = self.machine_mut(machine_id)?;
        machine.power_state = state;
        machine.pending_power_state = None;
        Ok(())
    }

    /// Records a power state requested from the engine but not acknowledged yet.
    pub fn set_pending_power_state(&mut self, machine_id: MachineId, state: Option<PowerState>) -> SchedulerResult<()> {
        self.machine_mut(machine_id)?.pending_power_state = state;
        Ok(())
    }

    pub fn set_core_performance(
        &mut self,
        machine_id: MachineId,
        core: u32,
        level: PerformanceLevel,
    ) -> SchedulerResult<()> {
        let machine = self.machine_mut(machine_id)?;
        match machine.core_performance.get_mut(core as usize) {
            Some(current) => {
                *current = level;
                Ok(())
            }
            None => Err(SchedulerError::InvalidCore { machine_id, core }),
        }
    }

    pub fn set_migration_status(&mut self, vm_id: VmId, status: MigrationStatus) -> SchedulerResult<()> {
        self.vm_mut(vm_id)?.migration = status;
        Ok(())
    }

    /// Returns machines satisfying the predicate, in ID order.
    pub fn machines_matching<P>(&self, predicate: P) -> impl Iterator<Item = &Machine>
    where
        P: Fn(&Machine) -> bool,
    {
        self.machines.values().filter(move |machine| predicate(machine))
    }

    /// Returns VMs satisfying the predicate, in ID order.
    pub fn vms_matching<P>(&self, predicate: P) -> impl Iterator<Item = &VirtualMachine>
    where
        P: Fn(&VirtualMachine) -> bool,
    {
        self.vms.values().filter(move |vm| predicate(vm))
    }

    /// Returns used and total memory of the specified machine.
    pub fn machine_load(&self, machine_id: MachineId) -> SchedulerResult<(u64, u64)> {
        let machine = self.machine(machine_id)?;
        Ok((machine.memory_used, machine.memory_total))
    }

    /// Fails with `CapacityExceeded` if the tracked memory of the machine is above its capacity.
    pub fn check_capacity(&self, machine_id: MachineId) -> SchedulerResult<()> {
        let machine = self.machine(machine_id)?;
        if machine.is_overcommitted() {
            return Err(SchedulerError::CapacityExceeded {
                machine_id,
                used: machine.memory_used,
                capacity: machine.memory_total,
            });
        }
        Ok(())
    }

    pub fn machine(&self, machine_id: MachineId) -> SchedulerResult<&Machine> {
        self.machines
            .get(&machine_id)
            .ok_or(SchedulerError::UnknownMachine(machine_id))
    }

    pub fn vm(&self, vm_id: VmId) -> SchedulerResult<&VirtualMachine> {
        self.vms.get(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))
    }

    /// Returns IDs of all VMs.
    pub fn vm_ids(&self) -> Vec<VmId> {
        self.vms.keys().cloned().collect()
    }

    pub fn machine_count(&self) -> u32 {
        self.machines.len() as u32
    }

    /// Returns the number of tasks currently bound to VMs.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn machine_mut(&mut self, machine_id: MachineId) -> SchedulerResult<&mut Machine> {
        self.machines
            .get_mut(&machine_id)
            .ok_or(SchedulerError::UnknownMachine(machine_id))
    }

    fn vm_mut(&mut self, vm_id: VmId) -> SchedulerResult<&mut VirtualMachine> {
        self.vms.get_mut(&vm_id).ok_or(SchedulerError::UnknownVm(vm_id))
    }

    /// Returns memory and number of tasks of the specified VM (zero for unknown VMs).
    pub fn vm_load(&self, vm_id: VmId) -> (u64, u32) {
        let Some(vm) = self.vms.get(&vm_id) else {
            return (0, 0);
        };
        let memory = vm
            .tasks
            .iter()
            .filter_map(|task_id| self.tasks.get(task_id))
            .map(|binding| binding.memory)
            .sum();
        (memory, vm.tasks.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(memory_used: u64, memory_total: u64) -> Machine {
        let mut machine = Machine::new(&MachineInfo {
            id: 0,
            cpu: CpuFamily::X86,
            num_cores: 2,
            memory_size: memory_total,
            memory_used: 0,
            gpus: false,
            s_state: PowerState::S0,
            active_tasks: 0,
            active_vms: 0,
        });
        machine.memory_used = memory_used;
        machine
    }

    #[test]
    fn test_utilization_comparison_is_strict() {
        // 1/4 vs 2/8 are equal ratios
        assert!(!machine(1, 4).less_utilized_than(&machine(2, 8)));
        assert!(!machine(2, 8).less_utilized_than(&machine(1, 4)));
        assert!(machine(1, 8).less_utilized_than(&machine(1, 4)));
        assert!(machine(0, 4).less_utilized_than(&machine(1, 1000)));
    }

    #[test]
    fn test_utilization_comparison_does_not_overflow() {
        let big = machine(u64::MAX / 2, u64::MAX);
        let small = machine(1, u64::MAX);
        assert!(small.less_utilized_than(&big));
    }
}
