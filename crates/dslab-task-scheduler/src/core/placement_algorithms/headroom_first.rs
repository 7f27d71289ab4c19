//! Headroom First algorithm.

use crate::core::common::TaskInfo;
use crate::core::inventory::{ClusterInventory, Machine};
use crate::core::placement::{eligible_vms, PlacementCandidate, TaskPlacementAlgorithm};

/// Uses the eligible VM whose host has the lowest memory utilization among hosts with an idle core,
/// falling back to the lowest utilization among all eligible hosts.
///
/// Both candidates are tracked in a single scan in VM ID order. Utilization ratios are compared
/// by cross-multiplication and only a strictly lower ratio replaces a candidate, so the first VM wins ties.
pub struct HeadroomFirst;

impl HeadroomFirst {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for HeadroomFirst {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPlacementAlgorithm for HeadroomFirst {
    fn select_vm(&self, task: &TaskInfo, inventory: &ClusterInventory) -> Option<PlacementCandidate> {
        let mut any_match: Option<PlacementCandidate> = None;
        let mut any_match_host: Option<&Machine> = None;
        let mut headroom: Option<PlacementCandidate> = None;
        let mut headroom_host: Option<&Machine> = None;

        for (vm, machine) in eligible_vms(task, inventory) {
            if any_match_host.map_or(true, |best| machine.less_utilized_than(best)) {
                any_match = Some(PlacementCandidate {
                    vm_id: vm.id,
                    machine_id: machine.id,
                    has_headroom: machine.has_headroom(),
                });
                any_match_host = Some(machine);
            }
            if machine.has_headroom() && headroom_host.map_or(true, |best| machine.less_utilized_than(best)) {
                headroom = Some(PlacementCandidate {
                    vm_id: vm.id,
                    machine_id: machine.id,
                    has_headroom: true,
                });
                headroom_host = Some(machine);
            }
        }

        headroom.or(any_match)
    }
}
