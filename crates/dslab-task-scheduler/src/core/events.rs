//! Events delivered by the engine to the scheduler.

use serde::{Deserialize, Serialize};

use crate::core::common::{MachineId, TaskId, Time, VmId};
use crate::core::engine::ClusterEngine;

/// Payload of an engine notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventData {
    /// Start of day: the engine is ready to describe the cluster.
    ClusterDescribed,
    NewTask { task_id: TaskId },
    TaskComplete { task_id: TaskId },
    MigrationDone { vm_id: VmId },
    MemoryWarning { machine_id: MachineId },
    SlaWarning { task_id: TaskId },
    StateChangeComplete { machine_id: MachineId },
    /// Periodic check without payload.
    SchedulerCheck,
    SimulationComplete,
}

/// Timestamped notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub time: Time,
    pub data: EventData,
}

impl Event {
    pub fn new(time: Time, data: EventData) -> Self {
        Self { time, data }
    }
}

/// Trait for components which consume engine notifications.
///
/// The engine delivers events one at a time and the handler must finish processing an event before the next one
/// is delivered. Commands issued while handling an event go to the same engine.
pub trait EventHandler {
    fn on(&mut self, event: Event, engine: &mut dyn ClusterEngine);
}
