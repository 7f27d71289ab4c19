//! Energy meter integrating the machine power consumption over time.

/// Number of joules in one kW·h.
pub const JOULES_PER_KWH: f64 = 3.6e6;

/// Energy meter structure.
#[derive(Debug, Clone, Default)]
pub struct EnergyMeter {
    energy_consumed: f64,
    current_power: f64,
    prev_time: f64,
}

impl EnergyMeter {
    /// Creates meter with zero power at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked each time the machine power consumption may have changed.
    ///
    /// The previous power level is charged for the elapsed interval. Calls with a time earlier than the previous
    /// one only replace the current power, so the consumed energy never decreases.
    pub fn update(&mut self, time: f64, power: f64) {
        if time > self.prev_time {
            self.energy_consumed += (time - self.prev_time) * self.current_power;
            self.prev_time = time;
        }
        self.current_power = power.max(0.);
    }

    /// Returns the total energy consumption in joules.
    pub fn energy_consumed(&self) -> f64 {
        self.energy_consumed
    }

    /// Returns the total energy consumption in kW·h.
    pub fn energy_consumed_kwh(&self) -> f64 {
        self.energy_consumed / JOULES_PER_KWH
    }

    /// Returns the power in watts charged from the last update.
    pub fn current_power(&self) -> f64 {
        self.current_power
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_is_integrated_per_interval() {
        let mut meter = EnergyMeter::new();
        meter.update(0., 100.);
        meter.update(10., 50.);
        meter.update(20., 0.);
        assert_eq!(meter.energy_consumed(), 1500.);
        meter.update(15., 1000.);
        assert_eq!(meter.energy_consumed(), 1500.);
    }
}
