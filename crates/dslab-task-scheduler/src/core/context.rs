//! Scheduler context.

use crate::core::common::{time_to_seconds, Time};

/// Identity and clock of the scheduler, threaded through every component call made while handling an event.
///
/// The time is not advanced by the scheduler itself: it is set from the timestamp of each delivered event.
#[derive(Clone, Debug)]
pub struct SchedulerContext {
    name: String,
    now: Time,
}

impl SchedulerContext {
    /// Creates context for the component with specified name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            now: 0,
        }
    }

    /// Returns the component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current time in seconds.
    pub fn time(&self) -> f64 {
        time_to_seconds(self.now)
    }

    /// Returns the current time in simulation time units.
    pub fn now(&self) -> Time {
        self.now
    }

    /// Moves the clock to the timestamp of the event being handled. Time never goes back.
    pub fn advance_to(&mut self, time: Time) {
        self.now = self.now.max(time);
    }
}
