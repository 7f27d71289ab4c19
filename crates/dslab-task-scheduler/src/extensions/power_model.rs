//! Machine power consumption models.

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::common::PowerState;

/// Power model is a function, which computes the power consumption of a machine
/// based on its power state and current CPU load.
pub trait PowerModel: DynClone {
    /// Returns the current power consumption of a machine in watts.
    ///
    /// - `state` - current machine power state.
    /// - `cpu_load` - share of the machine computing capacity in use, from 0 to 1. Lowered core performance
    ///   levels reduce the load.
    fn get_power(&self, state: PowerState, cpu_load: f64) -> f64;
}

clone_trait_object!(PowerModel);

/// Linear power model.
///
/// In S0 the power grows linearly from `idle_power` for an idle machine to `max_power` for a fully loaded one.
/// In sleep states the machine consumes a fixed share of `idle_power`, which decreases with the sleep depth
/// down to zero in S5.
#[derive(Clone)]
pub struct LinearPowerModel {
    max_power: f64,
    idle_power: f64,
}

impl LinearPowerModel {
    /// Creates model with idle power equal to 40% of maximum power.
    pub fn new(max_power: f64) -> Self {
        Self {
            max_power,
            idle_power: max_power * 0.4,
        }
    }

    pub fn new_with_idle_power(max_power: f64, idle_power: f64) -> Self {
        Self { max_power, idle_power }
    }

    fn sleep_share(state: PowerState) -> f64 {
        match state {
            PowerState::S0 => 1.,
            PowerState::S0i1 => 0.6,
            PowerState::S1 => 0.4,
            PowerState::S2 => 0.25,
            PowerState::S3 => 0.1,
            PowerState::S4 => 0.05,
            PowerState::S5 => 0.,
        }
    }
}

impl PowerModel for LinearPowerModel {
    fn get_power(&self, state: PowerState, cpu_load: f64) -> f64 {
        if !state.is_active() {
            return self.idle_power * Self::sleep_share(state);
        }
        let cpu_load = cpu_load.clamp(0., 1.);
        self.idle_power + cpu_load * (self.max_power - self.idle_power)
    }
}

/// Power model with constant consumption in S0 and zero consumption in any sleep state.
#[derive(Clone)]
pub struct ConstantPowerModel {
    power: f64,
}

impl ConstantPowerModel {
    pub fn new(power: f64) -> Self {
        Self { power }
    }
}

impl PowerModel for ConstantPowerModel {
    fn get_power(&self, state: PowerState, _cpu_load: f64) -> f64 {
        if state.is_active() {
            self.power
        } else {
            0.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_power_model() {
        let model = LinearPowerModel::new_with_idle_power(200., 100.);
        assert_eq!(model.get_power(PowerState::S0, 0.), 100.);
        assert_eq!(model.get_power(PowerState::S0, 0.5), 150.);
        assert_eq!(model.get_power(PowerState::S0, 2.), 200.);
        assert_eq!(model.get_power(PowerState::S3, 1.), 10.);
        assert_eq!(model.get_power(PowerState::S5, 1.), 0.);
    }
}
