//! Interface of the simulation engine as seen by the scheduler.

use crate::core::common::{
    CpuFamily, MachineId, MachineInfo, OsVariant, PerformanceLevel, PowerState, Priority, SlaClass, TaskId, TaskInfo,
    VmId, VmInfo,
};

/// Queries and commands the scheduler issues to the engine which owns the machine, VM and energy models.
///
/// Commands are requests: power state changes and VM migrations complete asynchronously and are
/// acknowledged by `StateChangeComplete` and `MigrationDone` events respectively.
pub trait ClusterEngine {
    /// Returns the total number of machines. Machine IDs are `0..machine_count()`.
    fn machine_count(&self) -> u32;

    /// Returns `None` for IDs the engine does not know. The same holds for task and VM queries.
    fn machine_info(&self, machine_id: MachineId) -> Option<MachineInfo>;

    fn task_info(&self, task_id: TaskId) -> Option<TaskInfo>;

    fn vm_info(&self, vm_id: VmId) -> Option<VmInfo>;

    /// Returns the energy consumed by the whole cluster so far, in kW·h.
    fn cluster_energy(&self) -> f64;

    /// Returns the percentage of tasks of the given class which violated their SLA.
    fn sla_report(&self, sla: SlaClass) -> f64;

    fn create_vm(&mut self, vm_type: OsVariant, cpu: CpuFamily) -> VmId;

    fn attach_vm(&mut self, vm_id: VmId, machine_id: MachineId);

    fn detach_vm(&mut self, vm_id: VmId);

    fn add_task(&mut self, vm_id: VmId, task_id: TaskId, priority: Priority);

    fn set_core_performance(&mut self, machine_id: MachineId, core: u32, level: PerformanceLevel);

    fn set_machine_state(&mut self, machine_id: MachineId, state: PowerState);

    fn migrate_vm(&mut self, vm_id: VmId, destination: MachineId);

    fn shutdown_vm(&mut self, vm_id: VmId);
}
