//! Scheduler handling engine notifications.

use std::collections::BTreeMap;

use crate::core::common::{CpuFamily, MachineId, OsVariant, PowerState, TaskId, TaskInfo, Time, VmId};
use crate::core::compliance::{ComplianceMonitor, SimulationReport};
use crate::core::config::SchedulerConfig;
use crate::core::context::SchedulerContext;
use crate::core::engine::ClusterEngine;
use crate::core::error::{ConfigError, SchedulerError, SchedulerResult};
use crate::core::events::{Event, EventData, EventHandler};
use crate::core::inventory::{ClusterInventory, Machine};
use crate::core::migration::{Migration, MigrationCoordinator};
use crate::core::placement::{placement_algorithm_resolver, TaskPlacementAlgorithm};
use crate::core::power::PowerController;
use crate::{log_debug, log_error, log_info, log_trace, log_warn};

/// Result of handling a new task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Task was assigned to the VM.
    Placed { vm_id: VmId, machine_id: MachineId },
    /// Task waits for the machine to power up.
    Deferred { machine_id: MachineId },
}

/// Scheduler decides which VM runs each task, when machines change power state and when VMs are relocated.
///
/// It is the single decision-making authority of a simulation run: all state lives in this object, which is
/// created once and receives every engine notification. The cluster state is kept in the inventory, the actual
/// VM selection is delegated to the configured placement algorithm, power management to the power controller,
/// VM relocations to the migration coordinator, and all counters to the compliance monitor.
pub struct Scheduler {
    ctx: SchedulerContext,
    config: SchedulerConfig,
    inventory: ClusterInventory,
    placement_algorithm: Box<dyn TaskPlacementAlgorithm>,
    power: PowerController,
    migrations: MigrationCoordinator,
    monitor: ComplianceMonitor,
    deferred: BTreeMap<MachineId, Vec<TaskId>>,
    report: Option<SimulationReport>,
}

impl Scheduler {
    /// Creates scheduler with specified name and configuration.
    pub fn new(name: &str, config: SchedulerConfig) -> Result<Self, ConfigError> {
        let placement_algorithm = placement_algorithm_resolver(&config.placement_algorithm)?;
        Ok(Self::with_placement_algorithm(name, config, placement_algorithm))
    }

    /// Creates scheduler which uses the given placement algorithm instead of the configured one.
    pub fn with_placement_algorithm(
        name: &str,
        config: SchedulerConfig,
        placement_algorithm: Box<dyn TaskPlacementAlgorithm>,
    ) -> Self {
        Self {
            ctx: SchedulerContext::new(name),
            power: PowerController::new(config.power.clone()),
            config,
            inventory: ClusterInventory::new(),
            placement_algorithm,
            migrations: MigrationCoordinator::new(),
            monitor: ComplianceMonitor::new(),
            deferred: BTreeMap::new(),
            report: None,
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.ctx
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn inventory(&self) -> &ClusterInventory {
        &self.inventory
    }

    pub fn monitor(&self) -> &ComplianceMonitor {
        &self.monitor
    }

    pub fn migrations(&self) -> &MigrationCoordinator {
        &self.migrations
    }

    /// Returns the end-of-run report once the simulation is complete.
    pub fn report(&self) -> Option<&SimulationReport> {
        self.report.as_ref()
    }

    /// Returns the number of tasks waiting for a machine to power up.
    pub fn deferred_task_count(&self) -> usize {
        self.deferred.values().map(|tasks| tasks.len()).sum()
    }

    /// Seeds VMs on every machine described by the engine and powers machines up.
    ///
    /// Each machine gets a Linux and a real-time Linux VM, plus a Windows VM on ARM and x86 machines
    /// or an AIX VM on POWER machines.
    pub fn init(&mut self, time: Time, engine: &mut dyn ClusterEngine) {
        self.ctx.advance_to(time);
        let machine_count = engine.machine_count();
        log_info!(self.ctx, "initializing scheduler, total number of machines is {}", machine_count);

        for machine_id in 0..machine_count {
            let Some(info) = engine.machine_info(machine_id) else {
                log_error!(self.ctx, "engine does not describe machine {}", machine_id);
                continue;
            };
            self.inventory.register_machine(&info);
            for os in OsVariant::seeded_for(info.cpu) {
                if let Err(e) = self.create_attached_vm(os, info.cpu, machine_id, engine) {
                    log_error!(self.ctx, "cannot seed {} vm on machine {}: {}", os, machine_id, e);
                }
            }
            if let Err(e) = self.power.power_up(&self.ctx, machine_id, &mut self.inventory, engine) {
                log_error!(self.ctx, "cannot power up machine {}: {}", machine_id, e);
            }
        }
        log_debug!(
            self.ctx,
            "created {} vms on {} machines",
            self.inventory.vm_ids().len(),
            self.inventory.machine_count()
        );
    }

    /// Places a newly arrived task. Failures are counted by the compliance monitor and returned.
    pub fn on_new_task(
        &mut self,
        time: Time,
        task_id: TaskId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<PlacementOutcome> {
        self.ctx.advance_to(time);
        log_trace!(self.ctx, "received new task {}", task_id);
        let result = match engine.task_info(task_id) {
            Some(task) => self.place_task(&task, engine),
            None => Err(SchedulerError::UnknownTask(task_id)),
        };
        self.monitor.record_task_requested();
        match &result {
            Ok(PlacementOutcome::Deferred { .. }) => self.monitor.record_task_deferred(),
            Ok(PlacementOutcome::Placed { .. }) => {}
            Err(e) => {
                log_warn!(self.ctx, "task {} is not scheduled: {}", task_id, e);
                self.monitor.record_placement_failure(e);
            }
        }
        result
    }

    /// Releases the load of a finished task.
    pub fn on_task_complete(&mut self, time: Time, task_id: TaskId, engine: &mut dyn ClusterEngine) -> SchedulerResult<()> {
        self.ctx.advance_to(time);
        log_trace!(self.ctx, "task {} is complete", task_id);
        let vm_id = self.inventory.vm_of_task(task_id)?;
        let machine_id = self.inventory.vm(vm_id)?.machine;
        self.inventory.record_task_completed(vm_id, task_id)?;
        if let Some(machine_id) = machine_id {
            self.power
                .on_task_complete(&self.ctx, machine_id, &mut self.inventory, engine)?;
        }
        Ok(())
    }

    /// Finishes VM relocation: the VM is attached to its new machine and accepts tasks again.
    pub fn on_migration_complete(
        &mut self,
        time: Time,
        vm_id: VmId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<Migration> {
        self.ctx.advance_to(time);
        self.migrations
            .on_migration_complete(&self.ctx, vm_id, &mut self.inventory, &*engine)
    }

    /// Counts a memory overcommit warning.
    pub fn on_memory_warning(&mut self, time: Time, machine_id: MachineId) {
        self.ctx.advance_to(time);
        self.monitor.record_memory_warning(machine_id, time);
        match self.inventory.check_capacity(machine_id) {
            Err(e) => log_warn!(self.ctx, "{}", e),
            Ok(()) => log_warn!(self.ctx, "machine {} reports memory overcommit", machine_id),
        }
    }

    /// Counts an SLA violation.
    pub fn on_sla_warning(&mut self, time: Time, task_id: TaskId) {
        self.ctx.advance_to(time);
        self.monitor.record_sla_violation(task_id, time);
        log_debug!(self.ctx, "task {} violated its SLA", task_id);
    }

    /// Applies acknowledged machine power state and places tasks waiting for that machine.
    pub fn on_state_change_complete(
        &mut self,
        time: Time,
        machine_id: MachineId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<PowerState> {
        self.ctx.advance_to(time);
        let state = self
            .power
            .on_state_change_complete(&self.ctx, machine_id, &mut self.inventory, engine)?;
        let machine = self.inventory.machine(machine_id)?;
        if machine.accepts_tasks() || machine.pending_power_state.is_none() {
            let waiting = self.deferred.remove(&machine_id).unwrap_or_default();
            for task_id in waiting {
                let Some(task) = engine.task_info(task_id) else {
                    log_warn!(self.ctx, "deferred task {} is unknown to the engine", task_id);
                    self.monitor
                        .record_placement_failure(&SchedulerError::UnknownTask(task_id));
                    continue;
                };
                match self.place_task(&task, engine) {
                    Ok(PlacementOutcome::Placed { vm_id, .. }) => {
                        log_debug!(self.ctx, "deferred task {} placed on vm {}", task_id, vm_id)
                    }
                    Ok(PlacementOutcome::Deferred { machine_id }) => {
                        log_debug!(self.ctx, "task {} deferred again, waiting for machine {}", task_id, machine_id)
                    }
                    Err(e) => {
                        log_warn!(self.ctx, "deferred task {} is not scheduled: {}", task_id, e);
                        self.monitor.record_placement_failure(&e);
                    }
                }
            }
        }
        Ok(state)
    }

    /// Periodic check: plans consolidation if enabled, then lets the power controller observe the machines.
    pub fn on_periodic_check(&mut self, time: Time, engine: &mut dyn ClusterEngine) {
        self.ctx.advance_to(time);
        if self.config.consolidation.enabled {
            let plan = self
                .migrations
                .plan_consolidation(&self.config.consolidation, &self.inventory);
            for (vm_id, destination) in plan {
                if let Err(e) =
                    self.migrations
                        .request_migration(&self.ctx, vm_id, destination, &mut self.inventory, engine)
                {
                    log_warn!(self.ctx, "consolidation of vm {} failed: {}", vm_id, e);
                }
            }
        }
        if let Err(e) = self.power.on_periodic_check(&self.ctx, &mut self.inventory, engine) {
            log_error!(self.ctx, "power check failed: {}", e);
        }
    }

    /// Produces the end-of-run report, then detaches and shuts down every VM.
    ///
    /// Tasks still waiting for a machine are counted as placement failures.
    pub fn on_simulation_complete(&mut self, time: Time, engine: &mut dyn ClusterEngine) -> SimulationReport {
        self.ctx.advance_to(time);
        for (machine_id, tasks) in std::mem::take(&mut self.deferred) {
            for task_id in tasks {
                log_warn!(self.ctx, "task {} still waits for machine {}", task_id, machine_id);
                self.monitor
                    .record_placement_failure(&SchedulerError::MachineInactive(machine_id));
            }
        }

        let report = self.monitor.report(time, &*engine);
        log_info!(
            self.ctx,
            "simulation finished: {} tasks requested, {} placed, {} not placed, {} migrations",
            self.monitor.tasks_requested(),
            self.monitor.tasks_placed(),
            self.monitor.placement_failures(),
            self.migrations.completed_count()
        );
        for vm_id in self.inventory.vm_ids() {
            if self.inventory.detach(vm_id).is_ok() {
                engine.detach_vm(vm_id);
            }
            engine.shutdown_vm(vm_id);
        }
        self.report = Some(report.clone());
        report
    }

    /// Requests relocation of a VM to another machine of the same CPU family.
    pub fn migrate_vm(
        &mut self,
        time: Time,
        vm_id: VmId,
        destination: MachineId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        self.ctx.advance_to(time);
        self.migrations
            .request_migration(&self.ctx, vm_id, destination, &mut self.inventory, engine)
    }

    /// Selects a VM for the task and assigns it, or parks the task on a machine being woken up.
    ///
    /// When the selected VM's machine has no idle core, a new VM with the task's image is created on an active
    /// machine of the same CPU family which has one. If there is no such machine, the task goes to the selected VM
    /// and another compatible machine is woken up for future tasks.
    fn place_task(&mut self, task: &TaskInfo, engine: &mut dyn ClusterEngine) -> SchedulerResult<PlacementOutcome> {
        match self.placement_algorithm.select_vm(task, &self.inventory) {
            Some(candidate) => {
                if !candidate.has_headroom {
                    match self.provision_vm(task, engine) {
                        Ok(Some((vm_id, machine_id))) => {
                            self.assign(task, vm_id, machine_id, engine)?;
                            return Ok(PlacementOutcome::Placed { vm_id, machine_id });
                        }
                        Ok(None) => {}
                        Err(e) => log_warn!(self.ctx, "cannot create vm for task {}: {}", task.id, e),
                    }
                    if let Err(e) = self.power.request_wake_up(&self.ctx, task, &mut self.inventory, engine) {
                        log_warn!(self.ctx, "cannot wake up machine for task {}: {}", task.id, e);
                    }
                }
                self.assign(task, candidate.vm_id, candidate.machine_id, engine)?;
                Ok(PlacementOutcome::Placed {
                    vm_id: candidate.vm_id,
                    machine_id: candidate.machine_id,
                })
            }
            None => match self.power.request_wake_up(&self.ctx, task, &mut self.inventory, engine)? {
                Some(machine_id) => {
                    log_debug!(self.ctx, "task {} waits for machine {}", task.id, machine_id);
                    self.deferred.entry(machine_id).or_default().push(task.id);
                    Ok(PlacementOutcome::Deferred { machine_id })
                }
                None => Err(SchedulerError::NoCompatibleVm {
                    task_id: task.id,
                    cpu: task.required_cpu,
                    os: task.required_vm,
                }),
            },
        }
    }

    /// Creates a VM with the task's image on the least utilized active machine of its CPU family with an idle core.
    fn provision_vm(
        &mut self,
        task: &TaskInfo,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<Option<(VmId, MachineId)>> {
        let mut best: Option<&Machine> = None;
        for machine in self
            .inventory
            .machines_matching(|m| m.accepts_tasks() && m.cpu == task.required_cpu && m.has_headroom())
        {
            if best.map_or(true, |b| machine.less_utilized_than(b)) {
                best = Some(machine);
            }
        }
        let Some(machine_id) = best.map(|m| m.id) else {
            return Ok(None);
        };
        let vm_id = self.create_attached_vm(task.required_vm, task.required_cpu, machine_id, engine)?;
        log_debug!(
            self.ctx,
            "created {} vm {} on machine {} for task {}",
            task.required_vm,
            vm_id,
            machine_id,
            task.id
        );
        Ok(Some((vm_id, machine_id)))
    }

    /// The engine is asked to attach the VM only after the inventory accepts it.
    fn create_attached_vm(
        &mut self,
        os: OsVariant,
        cpu: CpuFamily,
        machine_id: MachineId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<VmId> {
        let vm_id = engine.create_vm(os, cpu);
        self.inventory.create_vm(vm_id, os, cpu);
        self.inventory.attach(vm_id, machine_id)?;
        engine.attach_vm(vm_id, machine_id);
        Ok(vm_id)
    }

    fn assign(
        &mut self,
        task: &TaskInfo,
        vm_id: VmId,
        machine_id: MachineId,
        engine: &mut dyn ClusterEngine,
    ) -> SchedulerResult<()> {
        self.inventory.record_task_assigned(vm_id, task)?;
        let priority = self.config.priority_policy.priority_for(task);
        engine.add_task(vm_id, task.id, priority);
        self.monitor.record_task_placed();
        log_debug!(
            self.ctx,
            "task {} placed on vm {} (machine {}) with {} priority",
            task.id,
            vm_id,
            machine_id,
            priority
        );
        self.power
            .on_task_placed(&self.ctx, machine_id, &mut self.inventory, engine)
    }
}

impl EventHandler for Scheduler {
    fn on(&mut self, event: Event, engine: &mut dyn ClusterEngine) {
        let time = event.time;
        let result = match event.data {
            EventData::ClusterDescribed => {
                self.init(time, engine);
                Ok(())
            }
            EventData::NewTask { task_id } => {
                // failures are already counted and logged
                let _ = self.on_new_task(time, task_id, engine);
                Ok(())
            }
            EventData::TaskComplete { task_id } => self.on_task_complete(time, task_id, engine),
            EventData::MigrationDone { vm_id } => self.on_migration_complete(time, vm_id, engine).map(|_| ()),
            EventData::MemoryWarning { machine_id } => {
                self.on_memory_warning(time, machine_id);
                Ok(())
            }
            EventData::SlaWarning { task_id } => {
                self.on_sla_warning(time, task_id);
                Ok(())
            }
            EventData::StateChangeComplete { machine_id } => {
                self.on_state_change_complete(time, machine_id, engine).map(|_| ())
            }
            EventData::SchedulerCheck => {
                self.on_periodic_check(time, engine);
                Ok(())
            }
            EventData::SimulationComplete => {
                self.on_simulation_complete(time, engine);
                Ok(())
            }
        };
        if let Err(e) = result {
            log_warn!(self.ctx, "{}", e);
        }
    }
}
