use dslab_task_scheduler::core::common::{seconds_to_time, CpuFamily, MachineId, OsVariant, PowerState, SlaClass, TaskId};
use dslab_task_scheduler::core::config::SimulationConfig;
use dslab_task_scheduler::core::scheduler::{PlacementOutcome, Scheduler};
use dslab_task_scheduler::extensions::static_cluster::{EngineCommand, StaticClusterEngine};
use dslab_task_scheduler::extensions::workload::TaskRequest;

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn task(id: TaskId, memory: u64) -> TaskRequest {
    TaskRequest {
        id,
        arrival: 0.,
        duration: 5.,
        cpu: CpuFamily::X86,
        vm: OsVariant::Linux,
        sla: SlaClass::Sla2,
        memory,
        gpu: false,
    }
}

fn setup(config_file: &str) -> (StaticClusterEngine, Scheduler) {
    let config = SimulationConfig::from_file(&name_wrapper(config_file)).unwrap();
    let mut engine = StaticClusterEngine::new(&config);
    let mut scheduler = Scheduler::new("scheduler", config.scheduler).unwrap();
    scheduler.init(0, &mut engine);
    engine.clear_commands();
    (engine, scheduler)
}

fn state_requests(engine: &StaticClusterEngine) -> Vec<(MachineId, PowerState)> {
    engine
        .commands()
        .iter()
        .filter_map(|command| match command {
            EngineCommand::SetMachineState { machine_id, state } => Some((*machine_id, *state)),
            _ => None,
        })
        .collect()
}

/// Runs two idle checks and acknowledges the resulting sleep requests.
fn put_idle_machines_to_sleep(engine: &mut StaticClusterEngine, scheduler: &mut Scheduler) {
    scheduler.on_periodic_check(seconds_to_time(1.), engine);
    scheduler.on_periodic_check(seconds_to_time(2.), engine);
    for (machine_id, _) in state_requests(engine) {
        engine.complete_state_change(machine_id);
        scheduler
            .on_state_change_complete(seconds_to_time(2.2), machine_id, engine)
            .unwrap();
    }
    engine.clear_commands();
}

#[test]
// Machines sleep only after two consecutive idle checks, and at least one machine stays powered.
fn test_idle_machines_sleep() {
    let (mut engine, mut scheduler) = setup("power.yaml");

    scheduler.on_periodic_check(seconds_to_time(1.), &mut engine);
    assert!(state_requests(&engine).is_empty());

    scheduler.on_periodic_check(seconds_to_time(2.), &mut engine);
    assert_eq!(
        state_requests(&engine),
        vec![(0, PowerState::S3), (1, PowerState::S3)]
    );
    let machine = scheduler.inventory().machine(0).unwrap();
    assert_eq!(machine.pending_power_state, Some(PowerState::S3));
    assert!(!machine.accepts_tasks());

    assert_eq!(engine.complete_state_change(0), Some(PowerState::S3));
    assert_eq!(
        scheduler.on_state_change_complete(seconds_to_time(2.2), 0, &mut engine),
        Ok(PowerState::S3)
    );
    let machine = scheduler.inventory().machine(0).unwrap();
    assert_eq!(machine.power_state, PowerState::S3);
    assert_eq!(machine.pending_power_state, None);

    engine.clear_commands();
    for time in 3..10 {
        scheduler.on_periodic_check(seconds_to_time(time as f64), &mut engine);
    }
    assert!(state_requests(&engine).is_empty());
    assert!(scheduler.inventory().machine(2).unwrap().accepts_tasks());
}

#[test]
fn test_single_machine_never_sleeps() {
    let (mut engine, mut scheduler) = setup("one_x86.yaml");
    for time in 1..10 {
        scheduler.on_periodic_check(seconds_to_time(time as f64), &mut engine);
    }
    assert!(state_requests(&engine).is_empty());
}

#[test]
// A task without eligible VM wakes a sleeping machine and is placed once it is powered.
fn test_deferred_placement() {
    let (mut engine, mut scheduler) = setup("power.yaml");
    put_idle_machines_to_sleep(&mut engine, &mut scheduler);
    assert_eq!(scheduler.inventory().machine(0).unwrap().power_state, PowerState::S3);
    assert_eq!(scheduler.inventory().machine(1).unwrap().power_state, PowerState::S3);

    engine.submit_task(&task(0, 256));
    engine.submit_task(&task(1, 256));
    assert_eq!(
        scheduler.on_new_task(seconds_to_time(2.5), 0, &mut engine),
        Ok(PlacementOutcome::Deferred { machine_id: 0 })
    );
    // machine 0 is already waking up
    assert_eq!(
        scheduler.on_new_task(seconds_to_time(2.6), 1, &mut engine),
        Ok(PlacementOutcome::Deferred { machine_id: 0 })
    );
    assert_eq!(state_requests(&engine), vec![(0, PowerState::S0)]);
    assert_eq!(scheduler.deferred_task_count(), 2);
    assert_eq!(scheduler.monitor().tasks_deferred(), 2);
    assert_eq!(scheduler.inventory().task_count(), 0);

    assert_eq!(engine.complete_state_change(0), Some(PowerState::S0));
    assert_eq!(
        scheduler.on_state_change_complete(seconds_to_time(2.7), 0, &mut engine),
        Ok(PowerState::S0)
    );
    assert_eq!(scheduler.deferred_task_count(), 0);
    assert_eq!(scheduler.inventory().vm(0).unwrap().tasks, vec![0, 1]);
    assert_eq!(scheduler.monitor().tasks_placed(), 2);
    assert_eq!(scheduler.monitor().placement_failures(), 0);
}

#[test]
fn test_deferred_tasks_fail_at_shutdown() {
    let (mut engine, mut scheduler) = setup("power.yaml");
    put_idle_machines_to_sleep(&mut engine, &mut scheduler);

    engine.submit_task(&task(0, 256));
    scheduler.on_new_task(seconds_to_time(3.), 0, &mut engine).unwrap();
    let report = scheduler.on_simulation_complete(seconds_to_time(3.1), &mut engine);

    assert_eq!(report.tasks_requested, 1);
    assert_eq!(report.placement_failures, 1);
    assert_eq!(scheduler.deferred_task_count(), 0);
}

#[test]
// Sustained memory overcommit wakes a sleeping machine of the same CPU family.
fn test_overcommit_wakes_machine() {
    let (mut engine, mut scheduler) = setup("overcommit.yaml");
    put_idle_machines_to_sleep(&mut engine, &mut scheduler);
    assert_eq!(scheduler.inventory().machine(0).unwrap().power_state, PowerState::S3);

    engine.submit_task(&task(0, 2048));
    assert_eq!(
        scheduler.on_new_task(seconds_to_time(2.5), 0, &mut engine),
        Ok(PlacementOutcome::Placed { vm_id: 3, machine_id: 1 })
    );
    assert!(scheduler.inventory().check_capacity(1).is_err());

    scheduler.on_periodic_check(seconds_to_time(3.), &mut engine);
    assert!(state_requests(&engine).is_empty());
    scheduler.on_periodic_check(seconds_to_time(4.), &mut engine);
    assert_eq!(state_requests(&engine), vec![(0, PowerState::S0)]);
    assert_eq!(
        scheduler.inventory().machine(0).unwrap().pending_power_state,
        Some(PowerState::S0)
    );
}

#[test]
// An acknowledgement without a request still updates the machine state.
fn test_unrequested_state_change() {
    let (mut engine, mut scheduler) = setup("one_x86.yaml");
    assert_eq!(
        scheduler.on_state_change_complete(seconds_to_time(1.), 0, &mut engine),
        Ok(PowerState::S0)
    );
    assert!(scheduler.inventory().machine(0).unwrap().accepts_tasks());
}
