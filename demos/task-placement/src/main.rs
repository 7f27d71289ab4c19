use std::error::Error;
use std::time::Instant;

use clap::Parser;

use dslab_task_scheduler::core::config::SimulationConfig;
use dslab_task_scheduler::extensions::workload::{load_trace, WorkloadGenerator};
use dslab_task_scheduler::simulation::TaskSimulation;

fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Simulation config (YAML)
    #[clap(short, long, default_value = "config.yaml")]
    config: String,

    /// Task trace (JSON), a random workload is generated if absent
    #[clap(long)]
    trace: Option<String>,

    /// Number of generated tasks
    #[clap(long, default_value_t = 200)]
    tasks: usize,

    /// Mean time between generated task arrivals in seconds
    #[clap(long, default_value_t = 0.5)]
    interarrival: f64,

    /// Random seed of the workload generator
    #[clap(long, default_value_t = 123)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logger();
    let args = Args::parse();
    let simulation_start = Instant::now();

    let config = SimulationConfig::from_file(&args.config)?;
    let workload = match &args.trace {
        Some(trace) => load_trace(trace)?,
        None => WorkloadGenerator::new(args.seed, &config.hosts).generate(args.tasks, args.interarrival, 1., 20.),
    };
    log::info!("loaded {} tasks for {} host groups", workload.len(), config.hosts.len());

    let mut sim = TaskSimulation::new(config)?;
    sim.add_tasks(&workload);
    let report = sim.run();

    print!("{}", report);
    println!("Simulation process time {:.2?}", simulation_start.elapsed());
    Ok(())
}
