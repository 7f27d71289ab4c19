//! First Fit algorithm.

use crate::core::common::TaskInfo;
use crate::core::inventory::ClusterInventory;
use crate::core::placement::{eligible_vms, PlacementCandidate, TaskPlacementAlgorithm};

/// Uses the first eligible VM whose host has an idle core, or the first eligible VM at all.
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for FirstFit {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPlacementAlgorithm for FirstFit {
    fn select_vm(&self, task: &TaskInfo, inventory: &ClusterInventory) -> Option<PlacementCandidate> {
        let mut fallback = None;
        for (vm, machine) in eligible_vms(task, inventory) {
            let candidate = PlacementCandidate {
                vm_id: vm.id,
                machine_id: machine.id,
                has_headroom: machine.has_headroom(),
            };
            if candidate.has_headroom {
                return Some(candidate);
            }
            fallback.get_or_insert(candidate);
        }
        fallback
    }
}
