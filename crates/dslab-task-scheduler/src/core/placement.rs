//! Task placement algorithms.

use sugars::boxed;

use crate::core::common::{MachineId, TaskInfo, VmId};
use crate::core::config::options::parse_config_value;
use crate::core::error::ConfigError;
use crate::core::inventory::{ClusterInventory, Machine, VirtualMachine};
use crate::core::placement_algorithms::first_fit::FirstFit;
use crate::core::placement_algorithms::headroom_first::HeadroomFirst;

/// VM selected for a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlacementCandidate {
    pub vm_id: VmId,
    pub machine_id: MachineId,
    /// Host machine had an idle core at decision time.
    pub has_headroom: bool,
}

/// Trait for implementation of task placement algorithms.
///
/// The algorithm is a function of the task requirements and the current inventory state, which returns the VM
/// selected to run the task or `None` if no eligible VM exists. It must not have side effects: recording the
/// assignment is done by the scheduler.
pub trait TaskPlacementAlgorithm {
    fn select_vm(&self, task: &TaskInfo, inventory: &ClusterInventory) -> Option<PlacementCandidate>;
}

/// Hard filter applied before any ranking: exact CPU family and OS match, VM not migrating,
/// host machine fully powered with no pending transition.
pub fn is_eligible(task: &TaskInfo, vm: &VirtualMachine, machine: &Machine) -> bool {
    vm.matches(task.required_cpu, task.required_vm) && vm.migration.is_idle() && machine.accepts_tasks()
}

/// Returns eligible VMs for the task together with their host machines, in VM ID order.
pub fn eligible_vms<'a>(
    task: &'a TaskInfo,
    inventory: &'a ClusterInventory,
) -> impl Iterator<Item = (&'a VirtualMachine, &'a Machine)> + 'a {
    inventory
        .vms_matching(move |vm| vm.matches(task.required_cpu, task.required_vm))
        .filter_map(move |vm| {
            let machine = inventory.machine(vm.machine?).ok()?;
            is_eligible(task, vm, machine).then_some((vm, machine))
        })
}

/// Creates placement algorithm from its config name.
pub fn placement_algorithm_resolver(config_str: &str) -> Result<Box<dyn TaskPlacementAlgorithm>, ConfigError> {
    let (algorithm_name, _options) = parse_config_value(config_str);
    match algorithm_name.as_str() {
        "HeadroomFirst" => Ok(boxed!(HeadroomFirst::new())),
        "FirstFit" => Ok(boxed!(FirstFit::new())),
        _ => Err(ConfigError::InvalidValue {
            name: "placement_algorithm".to_string(),
            value: config_str.to_string(),
        }),
    }
}
