//! VM migration coordinator.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::core::common::{time_to_seconds, MachineId, Time, VmId};
use crate::core::config::ConsolidationConfig;
use crate::core::context::SchedulerContext;
use crate::core::engine::ClusterEngine;
use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::inventory::{ClusterInventory, MigrationStatus};
use crate::{log_debug, log_warn};

/// In-flight relocation of a VM.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Migration {
    pub vm_id: VmId,
    pub source: MachineId,
    pub destination: MachineId,
    pub started: Time,
}

/// Tracks in-flight VM migrations.
///
/// Each VM goes `Idle -> MigratingOut` when its migration is requested and stays attached to the source machine
/// (its tasks keep running there) until the engine reports completion. Then the VM passes through `MigratingIn`
/// while it is moved to the destination, and becomes `Idle` again. Any number of VMs can migrate at once.
#[derive(Default)]
pub struct MigrationCoordinator {
    in_flight: BTreeMap<VmId, Migration>,
    completed: u64,
}

impl MigrationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and issues migration of the VM to the destination machine.
    pub fn request_migration(
        &mut self,
        ctx: &SchedulerContext,
        vm_id: VmId,
        destination: MachineId,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        let vm = inventory.vm(vm_id)?;
        let source = vm.machine.ok_or(SchedulerError::NotAttached(vm_id))?;
        if !vm.migration.is_idle() {
            return Err(SchedulerError::VmBusyMigrating(vm_id));
        }
        let target = inventory.machine(destination)?;
        if source == destination {
            return Err(SchedulerError::AlreadyAttached(vm_id, destination));
        }
        if target.cpu != vm.cpu {
            return Err(SchedulerError::IncompatibleHardware {
                vm_id,
                machine_id: destination,
                vm_cpu: vm.cpu,
                machine_cpu: target.cpu,
            });
        }
        if !target.accepts_tasks() {
            return Err(SchedulerError::MachineInactive(destination));
        }

        log_debug!(ctx, "migrate vm {} from machine {} to machine {}", vm_id, source, destination);
        inventory.set_migration_status(vm_id, MigrationStatus::MigratingOut { destination })?;
        engine.migrate_vm(vm_id, destination);
        self.in_flight.insert(
            vm_id,
            Migration {
                vm_id,
                source,
                destination,
                started: ctx.now(),
            },
        );
        Ok(())
    }

    /// Moves the VM to its destination in the inventory and makes it eligible for new tasks again.
    pub fn on_migration_complete(
        &mut self,
        ctx: &SchedulerContext,
        vm_id: VmId,
        inventory: &mut ClusterInventory,
        engine: &dyn ClusterEngine,
    ) -> SchedulerResult<Migration> {
        let migration = self.in_flight.remove(&vm_id).ok_or(SchedulerError::NotMigrating(vm_id))?;

        let source = inventory.detach(vm_id)?;
        inventory.set_migration_status(vm_id, MigrationStatus::MigratingIn { source })?;
        if let Err(e) = inventory.attach(vm_id, migration.destination) {
            // the VM goes back to the source machine with its tasks
            log_warn!(
                ctx,
                "cannot attach migrated vm {} to machine {}: {}, keeping it on machine {}",
                vm_id,
                migration.destination,
                e,
                source
            );
            inventory.attach(vm_id, source)?;
            inventory.set_migration_status(vm_id, MigrationStatus::Idle)?;
            return Err(e);
        }
        inventory.set_migration_status(vm_id, MigrationStatus::Idle)?;
        self.completed += 1;

        let reported = engine.vm_info(vm_id).and_then(|info| info.machine_id);
        if reported != Some(migration.destination) {
            log_warn!(
                ctx,
                "engine reports vm {} on machine {:?} after migration to machine {}",
                vm_id,
                reported,
                migration.destination
            );
        }
        log_debug!(
            ctx,
            "vm {} migrated from machine {} to machine {} in {:.3}s",
            vm_id,
            migration.source,
            migration.destination,
            ctx.time() - time_to_seconds(migration.started)
        );
        Ok(migration)
    }

    pub fn is_migrating(&self, vm_id: VmId) -> bool {
        self.in_flight.contains_key(&vm_id)
    }

    /// Returns in-flight migrations in VM ID order.
    pub fn in_flight(&self) -> impl Iterator<Item = &Migration> {
        self.in_flight.values()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Plans VM relocations which empty underloaded machines.
    ///
    /// Every VM with tasks on an underloaded machine is moved onto the most loaded compatible machine which still
    /// has idle cores and free memory for the VM's tasks and is at least as loaded as the source. Machines selected
    /// as sources are never used as targets and vice versa.
    pub fn plan_consolidation(
        &self,
        config: &ConsolidationConfig,
        inventory: &ClusterInventory,
    ) -> Vec<(VmId, MachineId)> {
        let mut projected: BTreeMap<MachineId, (u32, u64)> = inventory
            .machines_matching(|m| m.accepts_tasks())
            .map(|m| (m.id, (m.active_tasks, m.memory_used)))
            .collect();
        let mut sources = BTreeSet::<MachineId>::new();
        let mut targets = BTreeSet::<MachineId>::new();
        let mut plan = Vec::new();

        let underloaded: Vec<MachineId> = inventory
            .machines_matching(|m| {
                m.accepts_tasks() && m.active_tasks > 0 && m.active_tasks <= config.underload_tasks
            })
            .map(|m| m.id)
            .collect();

        for source_id in underloaded {
            if targets.contains(&source_id) {
                continue;
            }
            let Ok(source) = inventory.machine(source_id) else {
                continue;
            };
            for vm_id in source.vms.iter() {
                let Ok(vm) = inventory.vm(*vm_id) else {
                    continue;
                };
                if !vm.migration.is_idle() || vm.tasks.is_empty() {
                    continue;
                }
                let (vm_memory, vm_tasks) = inventory.vm_load(vm.id);
                let source_tasks = projected.get(&source_id).map_or(0, |p| p.0);

                let mut best: Option<(MachineId, u32)> = None;
                for target in inventory.machines_matching(|m| m.accepts_tasks() && m.cpu == vm.cpu) {
                    if target.id == source_id || sources.contains(&target.id) {
                        continue;
                    }
                    let (tasks, memory) = projected[&target.id];
                    if tasks < source_tasks
                        || tasks + vm_tasks > target.num_cores
                        || memory + vm_memory > target.memory_total
                    {
                        continue;
                    }
                    if best.map_or(true, |(_, best_tasks)| tasks > best_tasks) {
                        best = Some((target.id, tasks));
                    }
                }

                if let Some((target_id, _)) = best {
                    plan.push((vm.id, target_id));
                    sources.insert(source_id);
                    targets.insert(target_id);
                    if let Some(p) = projected.get_mut(&target_id) {
                        p.0 += vm_tasks;
                        p.1 += vm_memory;
                    }
                    if let Some(p) = projected.get_mut(&source_id) {
                        p.0 = p.0.saturating_sub(vm_tasks);
                        p.1 = p.1.saturating_sub(vm_memory);
                    }
                }
            }
        }
        plan
    }
}
