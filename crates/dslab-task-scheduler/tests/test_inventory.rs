use dslab_task_scheduler::core::common::{
    CpuFamily, MachineId, MachineInfo, OsVariant, PerformanceLevel, PowerState, SlaClass, TaskId, TaskInfo, VmId,
};
use dslab_task_scheduler::core::error::SchedulerError;
use dslab_task_scheduler::core::inventory::{ClusterInventory, MigrationStatus};

fn machine_info(id: MachineId, cpu: CpuFamily, num_cores: u32, memory_size: u64) -> MachineInfo {
    MachineInfo {
        id,
        cpu,
        num_cores,
        memory_size,
        memory_used: 0,
        gpus: false,
        s_state: PowerState::S0,
        active_tasks: 0,
        active_vms: 0,
    }
}

fn task(id: TaskId, memory: u64) -> TaskInfo {
    TaskInfo {
        id,
        required_cpu: CpuFamily::X86,
        required_vm: OsVariant::Linux,
        required_sla: SlaClass::Sla1,
        required_memory: memory,
        gpu_capable: false,
    }
}

fn inventory_with_vm() -> (ClusterInventory, VmId) {
    let mut inventory = ClusterInventory::new();
    inventory.register_machine(&machine_info(0, CpuFamily::X86, 2, 4096));
    inventory.register_machine(&machine_info(1, CpuFamily::X86, 4, 8192));
    inventory.register_machine(&machine_info(2, CpuFamily::Arm, 2, 4096));
    let vm = inventory.create_vm(10, OsVariant::Linux, CpuFamily::X86);
    inventory.attach(vm, 0).unwrap();
    (inventory, vm)
}

#[test]
// Attaching across CPU families fails and leaves both records untouched.
fn test_attach_incompatible_hardware() {
    let (mut inventory, _) = inventory_with_vm();
    let vm = inventory.create_vm(11, OsVariant::Linux, CpuFamily::X86);

    assert_eq!(
        inventory.attach(vm, 2),
        Err(SchedulerError::IncompatibleHardware {
            vm_id: 11,
            machine_id: 2,
            vm_cpu: CpuFamily::X86,
            machine_cpu: CpuFamily::Arm,
        })
    );
    assert_eq!(inventory.vm(vm).unwrap().machine, None);
    assert!(inventory.machine(2).unwrap().vms.is_empty());
}

#[test]
fn test_attach_errors() {
    let (mut inventory, vm) = inventory_with_vm();
    assert_eq!(inventory.attach(vm, 1), Err(SchedulerError::AlreadyAttached(vm, 0)));
    assert_eq!(inventory.attach(99, 1), Err(SchedulerError::UnknownVm(99)));
    assert_eq!(inventory.attach(vm, 99), Err(SchedulerError::UnknownMachine(99)));

    let detached = inventory.create_vm(11, OsVariant::Win, CpuFamily::X86);
    assert_eq!(inventory.detach(detached), Err(SchedulerError::NotAttached(detached)));
}

#[test]
// Task load follows the VM when it is detached and attached to another machine.
fn test_task_load_moves_with_vm() {
    let (mut inventory, vm) = inventory_with_vm();
    inventory.record_task_assigned(vm, &task(0, 512)).unwrap();
    inventory.record_task_assigned(vm, &task(1, 256)).unwrap();

    assert_eq!(inventory.machine_load(0), Ok((768, 4096)));
    assert_eq!(inventory.machine(0).unwrap().active_tasks, 2);
    assert_eq!(inventory.vm_of_task(1), Ok(vm));

    assert_eq!(inventory.detach(vm), Ok(0));
    assert_eq!(inventory.machine_load(0), Ok((0, 4096)));
    assert_eq!(inventory.machine(0).unwrap().active_tasks, 0);

    inventory.attach(vm, 1).unwrap();
    assert_eq!(inventory.machine_load(1), Ok((768, 8192)));
    assert_eq!(inventory.machine(1).unwrap().active_tasks, 2);
    assert_eq!(inventory.vm(vm).unwrap().tasks, vec![0, 1]);

    inventory.record_task_completed(vm, 0).unwrap();
    assert_eq!(inventory.machine_load(1), Ok((256, 8192)));
    assert_eq!(inventory.machine(1).unwrap().active_tasks, 1);
    assert_eq!(inventory.task_count(), 1);
}

#[test]
fn test_assignment_to_migrating_vm_fails() {
    let (mut inventory, vm) = inventory_with_vm();
    inventory
        .set_migration_status(vm, MigrationStatus::MigratingOut { destination: 1 })
        .unwrap();

    assert_eq!(
        inventory.record_task_assigned(vm, &task(0, 512)),
        Err(SchedulerError::VmBusyMigrating(vm))
    );
    assert_eq!(inventory.task_count(), 0);
    assert_eq!(inventory.machine_load(0), Ok((0, 4096)));
}

#[test]
// Completion reported for the wrong VM does not release anything.
fn test_completion_of_unknown_task() {
    let (mut inventory, vm) = inventory_with_vm();
    let other = inventory.create_vm(11, OsVariant::Linux, CpuFamily::X86);
    inventory.attach(other, 1).unwrap();
    inventory.record_task_assigned(vm, &task(0, 512)).unwrap();

    assert_eq!(inventory.record_task_completed(other, 0), Err(SchedulerError::UnknownTask(0)));
    assert_eq!(inventory.record_task_completed(vm, 5), Err(SchedulerError::UnknownTask(5)));
    assert_eq!(inventory.vm_of_task(0), Ok(vm));
    assert_eq!(inventory.machine_load(0), Ok((512, 4096)));
}

#[test]
fn test_capacity_check() {
    let (mut inventory, vm) = inventory_with_vm();
    inventory.record_task_assigned(vm, &task(0, 4096)).unwrap();
    assert_eq!(inventory.check_capacity(0), Ok(()));

    inventory.record_task_assigned(vm, &task(1, 1)).unwrap();
    assert_eq!(
        inventory.check_capacity(0),
        Err(SchedulerError::CapacityExceeded {
            machine_id: 0,
            used: 4097,
            capacity: 4096,
        })
    );
}

#[test]
fn test_power_state_and_core_performance() {
    let (mut inventory, _) = inventory_with_vm();
    inventory.set_pending_power_state(0, Some(PowerState::S3)).unwrap();
    assert!(!inventory.machine(0).unwrap().accepts_tasks());

    inventory.set_machine_power_state(0, PowerState::S3).unwrap();
    let machine = inventory.machine(0).unwrap();
    assert_eq!(machine.power_state, PowerState::S3);
    assert_eq!(machine.pending_power_state, None);
    assert!(!machine.accepts_tasks());

    inventory.set_core_performance(1, 3, PerformanceLevel::P2).unwrap();
    assert_eq!(inventory.machine(1).unwrap().core_performance[3], PerformanceLevel::P2);
    assert_eq!(
        inventory.set_core_performance(1, 4, PerformanceLevel::P2),
        Err(SchedulerError::InvalidCore { machine_id: 1, core: 4 })
    );
}

#[test]
// Scans enumerate records in ID order.
fn test_predicate_queries() {
    let (mut inventory, _) = inventory_with_vm();
    inventory.create_vm(3, OsVariant::Win, CpuFamily::X86);
    inventory.create_vm(7, OsVariant::Linux, CpuFamily::Arm);
    inventory.attach(7, 2).unwrap();

    let x86: Vec<MachineId> = inventory
        .machines_matching(|m| m.cpu == CpuFamily::X86)
        .map(|m| m.id)
        .collect();
    assert_eq!(x86, vec![0, 1]);

    let linux: Vec<VmId> = inventory
        .vms_matching(|vm| vm.os == OsVariant::Linux)
        .map(|vm| vm.id)
        .collect();
    assert_eq!(linux, vec![7, 10]);

    let attached: Vec<VmId> = inventory.vms_matching(|vm| vm.machine.is_some()).map(|vm| vm.id).collect();
    assert_eq!(attached, vec![7, 10]);
    assert_eq!(inventory.vm_ids(), vec![3, 7, 10]);
    assert_eq!(inventory.machine_count(), 3);
}
