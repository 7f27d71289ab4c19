//! Simulation driver delivering events to the scheduler.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::common::{seconds_to_time, Time};
use crate::core::compliance::SimulationReport;
use crate::core::config::SimulationConfig;
use crate::core::context::SchedulerContext;
use crate::core::error::ConfigError;
use crate::core::events::{Event, EventData, EventHandler};
use crate::core::scheduler::Scheduler;
use crate::extensions::static_cluster::StaticClusterEngine;
use crate::extensions::workload::TaskRequest;
use crate::{log_debug, log_info};

struct QueuedEvent {
    id: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time
            .cmp(&self.event.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Replays a task workload against the scheduler using [`StaticClusterEngine`].
///
/// Events are delivered one at a time in time order, events with equal time in the order they were queued.
/// Task completions are computed by the engine from the current machine state, so they always reflect
/// the latest core performance levels and contention.
pub struct TaskSimulation {
    ctx: SchedulerContext,
    engine: StaticClusterEngine,
    scheduler: Scheduler,
    queue: BinaryHeap<QueuedEvent>,
    event_count: u64,
    check_period: Time,
    report: Option<SimulationReport>,
}

impl TaskSimulation {
    /// Creates simulation of the cluster described by the config. The scheduler learns about the cluster
    /// with the first delivered event.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        let scheduler = Scheduler::new("scheduler", config.scheduler.clone())?;
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Creates simulation which drives the given scheduler.
    pub fn with_scheduler(config: SimulationConfig, scheduler: Scheduler) -> Self {
        let mut sim = Self {
            ctx: SchedulerContext::new("simulation"),
            engine: StaticClusterEngine::new(&config),
            scheduler,
            queue: BinaryHeap::new(),
            event_count: 0,
            check_period: seconds_to_time(config.check_period).max(1),
            report: None,
        };
        sim.push(Event::new(0, EventData::ClusterDescribed));
        let first_check = sim.check_period;
        sim.push(Event::new(first_check, EventData::SchedulerCheck));
        sim
    }

    /// Submits task which arrives at its arrival time.
    pub fn add_task(&mut self, request: &TaskRequest) {
        self.engine.submit_task(request);
        self.push(Event::new(
            seconds_to_time(request.arrival),
            EventData::NewTask { task_id: request.id },
        ));
    }

    pub fn add_tasks(&mut self, requests: &[TaskRequest]) {
        for request in requests {
            self.add_task(request);
        }
    }

    /// Delivers the next event. Returns false if there are no more events.
    pub fn step(&mut self) -> bool {
        let completion = self.engine.next_completion();
        let queued_time = self.queue.peek().map(|queued| queued.event.time);
        let event = match (completion, queued_time) {
            (Some((time, task_id)), queued) if queued.map_or(true, |queued| time <= queued) => {
                Event::new(time, EventData::TaskComplete { task_id })
            }
            _ => match self.queue.pop() {
                Some(queued) => queued.event,
                None => return false,
            },
        };

        self.ctx.advance_to(event.time);
        self.engine.advance_to(event.time);
        self.engine.apply(&event);
        if event.data == EventData::SchedulerCheck {
            self.push(Event::new(event.time + self.check_period, EventData::SchedulerCheck));
        }
        self.scheduler.on(event, &mut self.engine);
        for notification in self.engine.take_notifications() {
            self.push(notification);
        }
        true
    }

    /// Delivers all events up to the specified time (inclusive).
    pub fn step_until_time(&mut self, time: Time) {
        while self.next_event_time().map_or(false, |next| next <= time) {
            self.step();
        }
    }

    /// Runs until every submitted task is finished or left unplaced and no state changes are pending,
    /// then completes the simulation.
    pub fn run(&mut self) -> SimulationReport {
        log_info!(self.ctx, "simulation started");
        while self.has_pending_work() && self.step() {}
        self.finish()
    }

    /// Delivers the end-of-simulation event and returns the report.
    pub fn finish(&mut self) -> SimulationReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let now = self.engine.now();
        let report = self.scheduler.on_simulation_complete(now, &mut self.engine);
        log_debug!(self.ctx, "{} events queued in total", self.event_count);
        log_info!(self.ctx, "simulation finished\n{}", report);
        self.report = Some(report.clone());
        report
    }

    /// Returns the time of the next event, if any.
    pub fn next_event_time(&self) -> Option<Time> {
        let completion = self.engine.next_completion().map(|(time, _)| time);
        let queued = self.queue.peek().map(|queued| queued.event.time);
        match (completion, queued) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> Time {
        self.engine.now()
    }

    pub fn engine(&self) -> &StaticClusterEngine {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn report(&self) -> Option<&SimulationReport> {
        self.report.as_ref()
    }

    /// Tasks are running or events other than periodic checks are queued.
    fn has_pending_work(&self) -> bool {
        self.engine.next_completion().is_some()
            || self
                .queue
                .iter()
                .any(|queued| queued.event.data != EventData::SchedulerCheck)
    }

    fn push(&mut self, event: Event) {
        self.queue.push(QueuedEvent {
            id: self.event_count,
            event,
        });
        self.event_count += 1;
    }
}
