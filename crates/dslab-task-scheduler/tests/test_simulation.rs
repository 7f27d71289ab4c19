use dslab_task_scheduler::core::common::{seconds_to_time, CpuFamily, OsVariant, SlaClass, TaskId};
use dslab_task_scheduler::core::config::SimulationConfig;
use dslab_task_scheduler::core::engine::ClusterEngine;
use dslab_task_scheduler::extensions::workload::{load_trace, TaskRequest, WorkloadGenerator};
use dslab_task_scheduler::simulation::TaskSimulation;

fn name_wrapper(file_name: &str) -> String {
    format!("test-configs/{}", file_name)
}

fn task(id: TaskId, arrival: f64, duration: f64, sla: SlaClass, memory: u64) -> TaskRequest {
    TaskRequest {
        id,
        arrival,
        duration,
        cpu: CpuFamily::X86,
        vm: OsVariant::Linux,
        sla,
        memory,
        gpu: false,
    }
}

fn simulation(config_file: &str) -> TaskSimulation {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = SimulationConfig::from_file(&name_wrapper(config_file)).unwrap();
    TaskSimulation::new(config).unwrap()
}

#[test]
// Tasks with a core each run at full speed and meet their SLA.
fn test_run_without_contention() {
    let mut sim = simulation("one_x86.yaml");
    sim.add_task(&task(0, 0., 2., SlaClass::Sla1, 512));
    sim.add_task(&task(1, 0., 2., SlaClass::Sla1, 512));
    let report = sim.run();

    assert_eq!(sim.time(), seconds_to_time(2.));
    assert_eq!(sim.engine().task_finish_time(0), Some(seconds_to_time(2.)));
    assert_eq!(sim.engine().task_finish_time(1), Some(seconds_to_time(2.)));
    assert_eq!(report.run_time, 2.);
    assert_eq!(report.tasks_requested, 2);
    assert_eq!(report.sla_violations, 0);
    assert_eq!(report.placement_failures, 0);
    assert_eq!(report.sla_violation_percent, [0., 0., 0.]);
    assert!(report.total_energy > 0.);
    assert_eq!(sim.report(), Some(&report));
    assert_eq!(sim.scheduler().report(), Some(&report));
}

#[test]
// Two tasks sharing a single core take twice as long, which breaks the strictest SLA.
fn test_contention_violates_sla() {
    let mut sim = simulation("one_core.yaml");
    sim.add_task(&task(0, 0., 1., SlaClass::Sla0, 512));
    sim.add_task(&task(1, 0., 1., SlaClass::Sla0, 512));
    let report = sim.run();

    assert_eq!(report.sla_violations, 2);
    assert_eq!(report.sla_violation_percent[0], 100.);
    assert_eq!(report.sla_violation_percent[1], 0.);
    assert!(report.run_time >= 1.9);
}

#[test]
fn test_memory_warning() {
    let mut sim = simulation("one_x86.yaml");
    sim.add_task(&task(0, 0., 1., SlaClass::Sla2, 5000));
    let report = sim.run();

    assert!(report.memory_warnings >= 1);
    assert_eq!(report.placement_failures, 0);
}

#[test]
fn test_task_without_matching_vm() {
    let mut sim = simulation("one_x86.yaml");
    let mut request = task(0, 0., 1., SlaClass::Sla2, 512);
    request.cpu = CpuFamily::Arm;
    sim.add_task(&request);
    let report = sim.run();

    assert_eq!(report.tasks_requested, 1);
    assert_eq!(report.placement_failures, 1);
    assert_eq!(sim.engine().running_task_count(), 0);
}

#[test]
// Cluster energy never decreases while the simulation advances.
fn test_energy_is_monotonic() {
    let config = SimulationConfig::from_file(&name_wrapper("simulation.yaml")).unwrap();
    let tasks = WorkloadGenerator::new(7, &config.hosts).generate(40, 0.3, 0.5, 2.);
    let mut sim = TaskSimulation::new(config).unwrap();
    sim.add_tasks(&tasks);

    let mut energy = 0.;
    for step in 1..=40 {
        sim.step_until_time(seconds_to_time(step as f64 * 0.5));
        let current = sim.engine().cluster_energy();
        assert!(current >= energy);
        energy = current;
    }
    let report = sim.run();
    assert!(report.total_energy >= energy);
    assert_eq!(report.tasks_requested, 40);
}

#[test]
// Runs with the same seed produce identical reports.
fn test_determinism() {
    let run = |seed: u64| {
        let config = SimulationConfig::from_file(&name_wrapper("simulation.yaml")).unwrap();
        let tasks = WorkloadGenerator::new(seed, &config.hosts).generate(60, 0.2, 0.5, 3.);
        let mut sim = TaskSimulation::new(config).unwrap();
        sim.add_tasks(&tasks);
        sim.run()
    };
    let first = run(42);
    assert_eq!(first, run(42));
    assert_eq!(first.tasks_requested, 60);
}

#[test]
fn test_trace_loading() {
    let tasks = load_trace(&name_wrapper("trace.json")).unwrap();
    let ids: Vec<TaskId> = tasks.iter().map(|task| task.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(tasks[0].gpu);
    assert!(!tasks[1].gpu);
    assert_eq!(tasks[1].vm, OsVariant::LinuxRt);
    assert_eq!(tasks[2].sla, SlaClass::Sla3);

    assert!(load_trace(&name_wrapper("missing.json")).is_err());
}

#[test]
// Trace tasks are replayed at their arrival times.
fn test_trace_replay() {
    let config = SimulationConfig::from_file(&name_wrapper("mixed.yaml")).unwrap();
    let tasks = load_trace(&name_wrapper("trace.json")).unwrap();
    let mut sim = TaskSimulation::new(config).unwrap();
    sim.add_tasks(&tasks);

    sim.step_until_time(seconds_to_time(0.6));
    assert_eq!(sim.scheduler().monitor().tasks_requested(), 2);
    let report = sim.run();
    assert_eq!(report.tasks_requested, 3);
    assert_eq!(report.placement_failures, 0);
    assert_eq!(sim.engine().task_finish_time(2), Some(seconds_to_time(2.)));
}
