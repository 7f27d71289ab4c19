//! Power state controller.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::common::{MachineId, PerformanceLevel, PowerState, TaskInfo};
use crate::core::config::PowerConfig;
use crate::core::context::SchedulerContext;
use crate::core::engine::ClusterEngine;
use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::inventory::{ClusterInventory, Machine, MigrationStatus, VirtualMachine};
use crate::{log_debug, log_trace, log_warn};

/// Controls machine power states and core performance levels.
///
/// Machines are put to sleep only after staying idle for `idle_checks_before_sleep` consecutive periodic checks,
/// and are woken up only on demand: when a task finds no eligible VM with core headroom, or when a machine of
/// the same CPU family stays overcommitted. Power state changes are requests which the engine acknowledges later,
/// until then the machine carries a pending state and receives no tasks.
pub struct PowerController {
    config: PowerConfig,
    idle_checks: BTreeMap<MachineId, u32>,
    overcommit_checks: BTreeMap<MachineId, u32>,
}

impl PowerController {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            idle_checks: BTreeMap::new(),
            overcommit_checks: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Sets every core of the machine to the highest performance level and requests full power.
    ///
    /// A machine already reported as fully powered is considered in S0 right away,
    /// otherwise S0 stays pending until acknowledged.
    pub fn power_up(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        self.set_all_cores(ctx, machine_id, PerformanceLevel::P0, inventory, engine)?;
        engine.set_machine_state(machine_id, PowerState::S0);
        if inventory.machine(machine_id)?.power_state.is_active() {
            inventory.set_machine_power_state(machine_id, PowerState::S0)
        } else {
            inventory.set_pending_power_state(machine_id, Some(PowerState::S0))
        }
    }

    /// Observes every machine once. Returns machines which were requested to sleep.
    pub fn on_periodic_check(
        &mut self,
        ctx: &SchedulerContext,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<Vec<MachineId>> {
        let migrating = machines_involved_in_migrations(inventory);
        let mut powered = inventory.machines_matching(|m| m.accepts_tasks()).count() as u32;
        let machine_ids: Vec<MachineId> = inventory.machines_matching(|_| true).map(|m| m.id).collect();
        let mut sleeping = Vec::new();

        for machine_id in machine_ids {
            let machine = inventory.machine(machine_id)?;
            if !machine.accepts_tasks() {
                self.idle_checks.remove(&machine_id);
                self.overcommit_checks.remove(&machine_id);
                continue;
            }

            if inventory.check_capacity(machine_id).is_err() {
                let checks = self.overcommit_checks.entry(machine_id).or_insert(0);
                *checks += 1;
                if *checks >= self.config.overcommit_checks_before_wake {
                    *checks = 0;
                    let cpu = machine.cpu;
                    let spare = inventory
                        .machines_matching(|m| m.cpu == cpu && is_asleep(m))
                        .map(|m| m.id)
                        .next();
                    if let Some(spare) = spare {
                        log_debug!(ctx, "machine {} stays overcommitted, waking machine {}", machine_id, spare);
                        self.request_state(ctx, spare, PowerState::S0, inventory, engine)?;
                    }
                }
            } else {
                self.overcommit_checks.remove(&machine_id);
            }

            let machine = inventory.machine(machine_id)?;
            if machine.active_tasks > 0 || migrating.contains(&machine_id) {
                self.idle_checks.remove(&machine_id);
                continue;
            }
            let checks = self.idle_checks.entry(machine_id).or_insert(0);
            *checks += 1;
            log_trace!(ctx, "machine {} idle for {} checks", machine_id, *checks);
            if *checks >= self.config.idle_checks_before_sleep && powered > self.config.min_active_machines {
                self.idle_checks.remove(&machine_id);
                self.request_state(ctx, machine_id, self.config.sleep_state, inventory, engine)?;
                powered -= 1;
                sleeping.push(machine_id);
            }
        }
        Ok(sleeping)
    }

    /// Lowers core performance of a machine which has just run out of tasks.
    pub fn on_task_complete(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        let machine = inventory.machine(machine_id)?;
        if machine.active_tasks == 0 && machine.power_state.is_active() {
            self.set_all_cores(ctx, machine_id, self.config.idle_performance, inventory, engine)?;
        }
        Ok(())
    }

    /// Restores the highest core performance on a machine which has just received a task.
    pub fn on_task_placed(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        self.idle_checks.remove(&machine_id);
        self.set_all_cores(ctx, machine_id, PerformanceLevel::P0, inventory, engine)
    }

    /// Makes sure a machine hosting a VM compatible with the task is powering up.
    ///
    /// Machines already waking up are preferred, then sleeping machines, then machines going to sleep.
    /// Returns the machine which will accept the task after its acknowledgement, if any.
    pub fn request_wake_up(
        &mut self,
        ctx: &SchedulerContext,
        task: &TaskInfo,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<Option<MachineId>> {
        let mut waking = None;
        let mut asleep = None;
        let mut falling_asleep = None;
        let compatible = |vm: &VirtualMachine| vm.matches(task.required_cpu, task.required_vm) && vm.migration.is_idle();
        for vm in inventory.vms_matching(compatible) {
            let Some(machine) = vm.machine.and_then(|id| inventory.machine(id).ok()) else {
                continue;
            };
            if machine.accepts_tasks() {
                continue;
            }
            if machine.pending_power_state == Some(PowerState::S0) {
                waking.get_or_insert(machine.id);
            } else if is_asleep(machine) {
                asleep.get_or_insert(machine.id);
            } else if machine.power_state.is_active() {
                falling_asleep.get_or_insert(machine.id);
            }
        }

        if let Some(machine_id) = waking {
            return Ok(Some(machine_id));
        }
        match asleep.or(falling_asleep) {
            Some(machine_id) => {
                log_debug!(ctx, "no headroom for task {}, waking machine {}", task.id, machine_id);
                self.request_state(ctx, machine_id, PowerState::S0, inventory, engine)?;
                Ok(Some(machine_id))
            }
            None => Ok(None),
        }
    }

    /// Applies the state reported by the engine after a state change request.
    ///
    /// If another request was issued meanwhile, it stays pending.
    pub fn on_state_change_complete(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<PowerState> {
        let pending = inventory.machine(machine_id)?.pending_power_state;
        let reported = engine
            .machine_info(machine_id)
            .ok_or(SchedulerError::UnknownMachine(machine_id))?
            .s_state;
        inventory.set_machine_power_state(machine_id, reported)?;
        match pending {
            Some(state) if state != reported => {
                log_debug!(
                    ctx,
                    "machine {} reached {}, still waiting for {}",
                    machine_id,
                    reported,
                    state
                );
                inventory.set_pending_power_state(machine_id, Some(state))?;
            }
            None => {
                log_warn!(ctx, "unexpected state change of machine {} to {}", machine_id, reported);
            }
            _ => {
                log_debug!(ctx, "machine {} is now in {}", machine_id, reported);
            }
        }
        if inventory.machine(machine_id)?.accepts_tasks() {
            self.set_all_cores(ctx, machine_id, PerformanceLevel::P0, inventory, engine)?;
        }
        Ok(reported)
    }

    fn request_state(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        state: PowerState,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        log_debug!(ctx, "request {} for machine {}", state, machine_id);
        engine.set_machine_state(machine_id, state);
        inventory.set_pending_power_state(machine_id, Some(state))
    }

    fn set_all_cores(
        &mut self,
        ctx: &SchedulerContext,
        machine_id: MachineId,
        level: PerformanceLevel,
        inventory: &mut ClusterInventory,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        let machine = inventory.machine(machine_id)?;
        if machine.core_performance.iter().all(|current| *current == level) {
            return Ok(());
        }
        let num_cores = machine.num_cores;
        log_trace!(ctx, "set cores of machine {} to {}", machine_id, level);
        for core in 0..num_cores {
            engine.set_core_performance(machine_id, core, level);
            inventory.set_core_performance(machine_id, core, level)?;
        }
        Ok(())
    }
}

fn is_asleep(machine: &Machine) -> bool {
    !machine.power_state.is_active() && machine.pending_power_state.is_none()
}

/// Machines which are a source or a destination of an in-flight migration.
fn machines_involved_in_migrations(inventory: &ClusterInventory) -> BTreeSet<MachineId> {
    let mut result = BTreeSet::new();
    for vm in inventory.vms_matching(|vm| !vm.migration.is_idle()) {
        if let Some(machine_id) = vm.machine {
            result.insert(machine_id);
        }
        match vm.migration {
            MigrationStatus::MigratingOut { destination } => {
                result.insert(destination);
            }
            MigrationStatus::MigratingIn { source } => {
                result.insert(source);
            }
            MigrationStatus::Idle => {}
        }
    }
    result
}
