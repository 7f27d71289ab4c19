//! In-memory cluster engine.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::common::{
    seconds_to_time, time_to_seconds, CpuFamily, MachineId, MachineInfo, OsVariant, PerformanceLevel, PowerState,
    Priority, SlaClass, TaskId, TaskInfo, Time, VmId, VmInfo,
};
use crate::core::config::{SimulationConfig, SlaSlowdown};
use crate::core::engine::ClusterEngine;
use crate::core::events::{Event, EventData};
use crate::extensions::energy_meter::EnergyMeter;
use crate::extensions::power_model::{LinearPowerModel, PowerModel};
use crate::extensions::workload::TaskRequest;

/// Maximum machine power in watts used when the host config does not specify it.
pub const DEFAULT_MAX_POWER: f64 = 200.;

/// Command received from the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCommand {
    CreateVm {
        vm_id: VmId,
        vm_type: OsVariant,
        cpu: CpuFamily,
    },
    AttachVm {
        vm_id: VmId,
        machine_id: MachineId,
    },
    DetachVm {
        vm_id: VmId,
    },
    AddTask {
        vm_id: VmId,
        task_id: TaskId,
        priority: Priority,
    },
    SetCorePerformance {
        machine_id: MachineId,
        core: u32,
        level: PerformanceLevel,
    },
    SetMachineState {
        machine_id: MachineId,
        state: PowerState,
    },
    MigrateVm {
        vm_id: VmId,
        destination: MachineId,
    },
    ShutdownVm {
        vm_id: VmId,
    },
}

struct EngineMachine {
    cpu: CpuFamily,
    num_cores: u32,
    memory_size: u64,
    gpus: bool,
    s_state: PowerState,
    requested_states: VecDeque<PowerState>,
    core_performance: Vec<PerformanceLevel>,
    vms: BTreeSet<VmId>,
    power_model: Box<dyn PowerModel>,
    energy_meter: EnergyMeter,
}

impl EngineMachine {
    fn average_speed(&self) -> f64 {
        if self.core_performance.is_empty() {
            return 0.;
        }
        self.core_performance.iter().map(|level| level.speed_factor()).sum::<f64>() / self.core_performance.len() as f64
    }
}

struct EngineVm {
    os: OsVariant,
    cpu: CpuFamily,
    machine: Option<MachineId>,
    tasks: Vec<TaskId>,
    migration_target: Option<MachineId>,
}

struct EngineTask {
    request: TaskRequest,
    priority: Option<Priority>,
    /// Work left in seconds at full speed.
    remaining: f64,
    finished: Option<Time>,
    violated: bool,
}

/// Cluster engine keeping the whole machine, VM and task state in memory.
///
/// Tasks running on a machine share its cores: each task progresses at the average core speed while there are
/// no more tasks than cores, and proportionally slower otherwise. Machines outside S0 make no progress.
/// Asynchronous commands (power state changes and migrations) complete after the configured durations,
/// the corresponding notifications are queued and handed out by [`take_notifications`](Self::take_notifications).
/// The engine state for a notification is applied by [`apply`](Self::apply) right before it is delivered.
pub struct StaticClusterEngine {
    now: Time,
    migration_duration: Time,
    state_change_duration: Time,
    vm_memory_overhead: u64,
    sla_slowdown: SlaSlowdown,
    machines: Vec<EngineMachine>,
    vms: BTreeMap<VmId, EngineVm>,
    tasks: BTreeMap<TaskId, EngineTask>,
    next_vm_id: VmId,
    commands: Vec<EngineCommand>,
    notifications: Vec<Event>,
}

impl StaticClusterEngine {
    /// Creates engine with machines described by the simulation config.
    pub fn new(config: &SimulationConfig) -> Self {
        let mut engine = Self {
            now: 0,
            migration_duration: seconds_to_time(config.migration_duration),
            state_change_duration: seconds_to_time(config.state_change_duration),
            vm_memory_overhead: config.vm_memory_overhead,
            sla_slowdown: config.sla_slowdown.clone(),
            machines: Vec::new(),
            vms: BTreeMap::new(),
            tasks: BTreeMap::new(),
            next_vm_id: 0,
            commands: Vec::new(),
            notifications: Vec::new(),
        };
        for host in config.hosts.iter() {
            let max_power = host.max_power.unwrap_or(DEFAULT_MAX_POWER);
            let idle_power = host.idle_power.unwrap_or(max_power * 0.4);
            for _ in 0..host.count.unwrap_or(1) {
                engine.add_machine(
                    host.cpu,
                    host.cores,
                    host.memory,
                    host.gpus.unwrap_or(false),
                    Box::new(LinearPowerModel::new_with_idle_power(max_power, idle_power)),
                );
            }
        }
        engine
    }

    /// Adds fully powered machine and returns its ID.
    pub fn add_machine(
        &mut self,
        cpu: CpuFamily,
        num_cores: u32,
        memory_size: u64,
        gpus: bool,
        power_model: Box<dyn PowerModel>,
    ) -> MachineId {
        let id = self.machines.len() as MachineId;
        let mut machine = EngineMachine {
            cpu,
            num_cores,
            memory_size,
            gpus,
            s_state: PowerState::S0,
            requested_states: VecDeque::new(),
            core_performance: vec![PerformanceLevel::P0; num_cores as usize],
            vms: BTreeSet::new(),
            power_model,
            energy_meter: EnergyMeter::new(),
        };
        let power = machine.power_model.get_power(machine.s_state, 0.);
        machine.energy_meter.update(time_to_seconds(self.now), power);
        self.machines.push(machine);
        id
    }

    /// Registers task so that its description can be queried once it arrives.
    pub fn submit_task(&mut self, request: &TaskRequest) {
        self.tasks.insert(
            request.id,
            EngineTask {
                request: request.clone(),
                priority: None,
                remaining: request.duration.max(0.),
                finished: None,
                violated: false,
            },
        );
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Moves the engine clock forward, progressing running tasks and integrating energy.
    pub fn advance_to(&mut self, time: Time) {
        if time <= self.now {
            return;
        }
        let elapsed = time_to_seconds(time - self.now);
        for machine_id in 0..self.machines.len() as MachineId {
            let rate = self.task_rate(machine_id);
            if rate > 0. {
                for task_id in self.running_tasks(machine_id) {
                    if let Some(task) = self.tasks.get_mut(&task_id) {
                        task.remaining = (task.remaining - elapsed * rate).max(0.);
                    }
                }
            }
        }
        self.now = time;
        for machine_id in 0..self.machines.len() as MachineId {
            self.refresh_power(machine_id);
        }
    }

    /// Returns the earliest task completion under the current machine state.
    pub fn next_completion(&self) -> Option<(Time, TaskId)> {
        let mut result: Option<(Time, TaskId)> = None;
        for machine_id in 0..self.machines.len() as MachineId {
            let rate = self.task_rate(machine_id);
            if rate <= 0. {
                continue;
            }
            for task_id in self.running_tasks(machine_id) {
                let remaining = self.tasks.get(&task_id).map_or(0., |task| task.remaining);
                let time = self.now + seconds_to_time(remaining / rate);
                if result.map_or(true, |best| (time, task_id) < best) {
                    result = Some((time, task_id));
                }
            }
        }
        result
    }

    /// Finishes task and checks its SLA. Returns true if the task violated its SLA.
    pub fn complete_task(&mut self, task_id: TaskId) -> bool {
        let now = self.now;
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.finished.is_some() {
            return false;
        }
        task.remaining = 0.;
        task.finished = Some(now);
        let turnaround = time_to_seconds(now) - task.request.arrival;
        if let Some(limit) = self.sla_slowdown.limit(task.request.sla) {
            task.violated = turnaround > task.request.duration * limit;
        }
        let violated = task.violated;

        let mut machine = None;
        for vm in self.vms.values_mut() {
            if let Some(pos) = vm.tasks.iter().position(|id| *id == task_id) {
                vm.tasks.remove(pos);
                machine = vm.machine;
                break;
            }
        }
        if let Some(machine_id) = machine {
            self.refresh_power(machine_id);
        }
        if violated {
            self.notify(now, EventData::SlaWarning { task_id });
        }
        violated
    }

    /// Applies the oldest requested power state of the machine.
    pub fn complete_state_change(&mut self, machine_id: MachineId) -> Option<PowerState> {
        let machine = self.machines.get_mut(machine_id as usize)?;
        let state = machine.requested_states.pop_front()?;
        machine.s_state = state;
        self.refresh_power(machine_id);
        Some(state)
    }

    /// Moves migrating VM to its destination machine.
    pub fn complete_migration(&mut self, vm_id: VmId) -> Option<MachineId> {
        let vm = self.vms.get_mut(&vm_id)?;
        let destination = vm.migration_target.take()?;
        let source = vm.machine.replace(destination);
        if let Some(source) = source {
            if let Some(machine) = self.machines.get_mut(source as usize) {
                machine.vms.remove(&vm_id);
            }
            self.refresh_power(source);
        }
        if let Some(machine) = self.machines.get_mut(destination as usize) {
            machine.vms.insert(vm_id);
        }
        self.refresh_power(destination);
        self.check_memory(destination);
        Some(destination)
    }

    /// Applies the engine state change carried by the notification.
    pub fn apply(&mut self, event: &Event) {
        match event.data {
            EventData::TaskComplete { task_id } => {
                self.complete_task(task_id);
            }
            EventData::StateChangeComplete { machine_id } => {
                self.complete_state_change(machine_id);
            }
            EventData::MigrationDone { vm_id } => {
                self.complete_migration(vm_id);
            }
            _ => {}
        }
    }

    /// Returns notifications queued since the previous call.
    pub fn take_notifications(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.notifications)
    }

    /// Returns all commands received so far.
    pub fn commands(&self) -> &[EngineCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Returns the energy consumed by the machine so far, in kW·h.
    pub fn machine_energy(&self, machine_id: MachineId) -> f64 {
        self.machines
            .get(machine_id as usize)
            .map_or(0., |machine| machine.energy_meter.energy_consumed_kwh())
    }

    /// Returns the current power consumption of the machine in watts.
    pub fn machine_power(&self, machine_id: MachineId) -> f64 {
        self.machines
            .get(machine_id as usize)
            .map_or(0., |machine| machine.energy_meter.current_power())
    }

    /// Returns the completion time of the task, if finished.
    pub fn task_finish_time(&self, task_id: TaskId) -> Option<Time> {
        self.tasks.get(&task_id).and_then(|task| task.finished)
    }

    /// Returns the priority the task was added with.
    pub fn task_priority(&self, task_id: TaskId) -> Option<Priority> {
        self.tasks.get(&task_id).and_then(|task| task.priority)
    }

    /// Returns the number of tasks added to VMs and not finished yet.
    pub fn running_task_count(&self) -> usize {
        self.vms.values().map(|vm| vm.tasks.len()).sum()
    }

    fn running_tasks(&self, machine_id: MachineId) -> Vec<TaskId> {
        let Some(machine) = self.machines.get(machine_id as usize) else {
            return Vec::new();
        };
        machine
            .vms
            .iter()
            .filter_map(|vm_id| self.vms.get(vm_id))
            .flat_map(|vm| vm.tasks.iter().cloned())
            .collect()
    }

    fn task_rate(&self, machine_id: MachineId) -> f64 {
        let Some(machine) = self.machines.get(machine_id as usize) else {
            return 0.;
        };
        if !machine.s_state.is_active() || machine.num_cores == 0 {
            return 0.;
        }
        let tasks = self.running_tasks(machine_id).len();
        if tasks == 0 {
            return 0.;
        }
        let share = (machine.num_cores as f64 / tasks as f64).min(1.);
        machine.average_speed() * share
    }

    fn memory_used(&self, machine_id: MachineId) -> u64 {
        let Some(machine) = self.machines.get(machine_id as usize) else {
            return 0;
        };
        machine
            .vms
            .iter()
            .filter_map(|vm_id| self.vms.get(vm_id))
            .map(|vm| {
                self.vm_memory_overhead
                    + vm
                        .tasks
                        .iter()
                        .filter_map(|task_id| self.tasks.get(task_id))
                        .map(|task| task.request.memory)
                        .sum::<u64>()
            })
            .sum()
    }

    fn check_memory(&mut self, machine_id: MachineId) {
        let Some(machine) = self.machines.get(machine_id as usize) else {
            return;
        };
        if self.memory_used(machine_id) > machine.memory_size {
            self.notify(self.now, EventData::MemoryWarning { machine_id });
        }
    }

    fn refresh_power(&mut self, machine_id: MachineId) {
        let tasks = self.running_tasks(machine_id).len();
        let time = time_to_seconds(self.now);
        let Some(machine) = self.machines.get_mut(machine_id as usize) else {
            return;
        };
        let cpu_load = if machine.num_cores == 0 {
            0.
        } else {
            (tasks as f64 / machine.num_cores as f64).min(1.) * machine.average_speed()
        };
        let power = machine.power_model.get_power(machine.s_state, cpu_load);
        machine.energy_meter.update(time, power);
    }

    fn notify(&mut self, time: Time, data: EventData) {
        self.notifications.push(Event::new(time, data));
    }
}

impl ClusterEngine for StaticClusterEngine {
    fn machine_count(&self) -> u32 {
        self.machines.len() as u32
    }

    fn machine_info(&self, machine_id: MachineId) -> Option<MachineInfo> {
        let machine = self.machines.get(machine_id as usize)?;
        Some(MachineInfo {
            id: machine_id,
            cpu: machine.cpu,
            num_cores: machine.num_cores,
            memory_size: machine.memory_size,
            memory_used: self.memory_used(machine_id),
            gpus: machine.gpus,
            s_state: machine.s_state,
            active_tasks: self.running_tasks(machine_id).len() as u32,
            active_vms: machine.vms.len() as u32,
        })
    }

    fn task_info(&self, task_id: TaskId) -> Option<TaskInfo> {
        self.tasks.get(&task_id).map(|task| task.request.task_info())
    }

    fn vm_info(&self, vm_id: VmId) -> Option<VmInfo> {
        let vm = self.vms.get(&vm_id)?;
        Some(VmInfo {
            id: vm_id,
            vm_type: vm.os,
            cpu: vm.cpu,
            machine_id: vm.machine,
            active_tasks: vm.tasks.clone(),
        })
    }

    fn cluster_energy(&self) -> f64 {
        self.machines
            .iter()
            .map(|machine| machine.energy_meter.energy_consumed_kwh())
            .sum()
    }

    fn sla_report(&self, sla: SlaClass) -> f64 {
        let (finished, violated) = self
            .tasks
            .values()
            .filter(|task| task.request.sla == sla && task.finished.is_some())
            .fold((0u64, 0u64), |(finished, violated), task| {
                (finished + 1, violated + task.violated as u64)
            });
        if finished == 0 {
            0.
        } else {
            violated as f64 * 100. / finished as f64
        }
    }

    fn create_vm(&mut self, vm_type: OsVariant, cpu: CpuFamily) -> VmId {
        let vm_id = self.next_vm_id;
        self.next_vm_id += 1;
        self.vms.insert(
            vm_id,
            EngineVm {
                os: vm_type,
                cpu,
                machine: None,
                tasks: Vec::new(),
                migration_target: None,
            },
        );
        self.commands.push(EngineCommand::CreateVm { vm_id, vm_type, cpu });
        vm_id
    }

    fn attach_vm(&mut self, vm_id: VmId, machine_id: MachineId) {
        self.commands.push(EngineCommand::AttachVm { vm_id, machine_id });
        if let Some(vm) = self.vms.get_mut(&vm_id) {
            vm.machine = Some(machine_id);
        }
        if let Some(machine) = self.machines.get_mut(machine_id as usize) {
            machine.vms.insert(vm_id);
        }
        self.refresh_power(machine_id);
        self.check_memory(machine_id);
    }

    fn detach_vm(&mut self, vm_id: VmId) {
        self.commands.push(EngineCommand::DetachVm { vm_id });
        let Some(machine_id) = self.vms.get_mut(&vm_id).and_then(|vm| vm.machine.take()) else {
            return;
        };
        if let Some(machine) = self.machines.get_mut(machine_id as usize) {
            machine.vms.remove(&vm_id);
        }
        self.refresh_power(machine_id);
    }

    fn add_task(&mut self, vm_id: VmId, task_id: TaskId, priority: Priority) {
        self.commands.push(EngineCommand::AddTask {
            vm_id,
            task_id,
            priority,
        });
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.priority = Some(priority);
        }
        let Some(vm) = self.vms.get_mut(&vm_id) else {
            return;
        };
        vm.tasks.push(task_id);
        if let Some(machine_id) = vm.machine {
            self.refresh_power(machine_id);
            self.check_memory(machine_id);
        }
    }

    fn set_core_performance(&mut self, machine_id: MachineId, core: u32, level: PerformanceLevel) {
        self.commands.push(EngineCommand::SetCorePerformance {
            machine_id,
            core,
            level,
        });
        if let Some(current) = self
            .machines
            .get_mut(machine_id as usize)
            .and_then(|machine| machine.core_performance.get_mut(core as usize))
        {
            *current = level;
        }
        self.refresh_power(machine_id);
    }

    fn set_machine_state(&mut self, machine_id: MachineId, state: PowerState) {
        self.commands.push(EngineCommand::SetMachineState { machine_id, state });
        let Some(machine) = self.machines.get_mut(machine_id as usize) else {
            return;
        };
        if machine.s_state == state && machine.requested_states.is_empty() {
            return;
        }
        machine.requested_states.push_back(state);
        self.notify(
            self.now + self.state_change_duration,
            EventData::StateChangeComplete { machine_id },
        );
    }

    fn migrate_vm(&mut self, vm_id: VmId, destination: MachineId) {
        self.commands.push(EngineCommand::MigrateVm { vm_id, destination });
        if let Some(vm) = self.vms.get_mut(&vm_id) {
            vm.migration_target = Some(destination);
            self.notify(self.now + self.migration_duration, EventData::MigrationDone { vm_id });
        }
    }

    fn shutdown_vm(&mut self, vm_id: VmId) {
        self.commands.push(EngineCommand::ShutdownVm { vm_id });
        let Some(vm) = self.vms.get_mut(&vm_id) else {
            return;
        };
        vm.tasks.clear();
        vm.migration_target = None;
        if let Some(machine_id) = vm.machine.take() {
            if let Some(machine) = self.machines.get_mut(machine_id as usize) {
                machine.vms.remove(&vm_id);
            }
            self.refresh_power(machine_id);
        }
    }
}
