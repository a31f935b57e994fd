use serde::Deserialize;

use super::error::CoreError;
use crate::units::Real;

/// Runtime parameters of the density and gradient passes.
///
/// Loaded from the run's parameter file by the surrounding harness;
/// [`SimulationConfig::validate`] is called at every pass entry so a bad
/// bundle fails before any particle state is touched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Desired effective neighbor count N*.
    pub des_num_ngb: Real,
    /// Allowed deviation Δ around `des_num_ngb`.
    pub max_ngb_deviation: Real,
    /// Lower bound on the gas smoothing length. Particles pinned at this
    /// bound are allowed to exceed the neighbor tolerance.
    pub min_gas_hsml: Real,
    /// Hard ceiling on neighbor iterations before the pass aborts.
    pub max_iter: u32,
    /// Byte budget (in MiB) for the query/result staging buffers of one
    /// tree walk.
    pub buffer_size_mib: usize,
    /// Adiabatic index of the gas equation of state.
    pub gamma: Real,
    /// Overshoot tolerance τ of the slope limiter. 0 disables overshoot.
    pub overshoot_tolerance: Real,
    /// Multiplier on `des_num_ngb` for sink-kind particles.
    pub sink_ngb_factor: Real,
    /// Optional fixed search radius for sink particles, e.g. a feedback
    /// radius wider than the density kernel.
    pub sink_search_radius: Option<Real>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            des_num_ngb: 32.0,
            max_ngb_deviation: 2.0,
            min_gas_hsml: 0.0,
            max_iter: 150,
            buffer_size_mib: 32,
            gamma: 5.0 / 3.0,
            overshoot_tolerance: 0.0,
            sink_ngb_factor: 1.0,
            sink_search_radius: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.des_num_ngb > 0.0) {
            return Err(CoreError::Config(format!(
                "des_num_ngb must be positive, got {}",
                self.des_num_ngb
            )));
        }
        if !(self.max_ngb_deviation > 0.0) {
            return Err(CoreError::Config(format!(
                "max_ngb_deviation must be positive, got {}",
                self.max_ngb_deviation
            )));
        }
        if self.des_num_ngb <= self.max_ngb_deviation {
            return Err(CoreError::Config(format!(
                "des_num_ngb ({}) must exceed max_ngb_deviation ({})",
                self.des_num_ngb, self.max_ngb_deviation
            )));
        }
        if self.min_gas_hsml < 0.0 || !self.min_gas_hsml.is_finite() {
            return Err(CoreError::Config(format!(
                "min_gas_hsml must be a non-negative finite value, got {}",
                self.min_gas_hsml
            )));
        }
        if self.max_iter == 0 {
            return Err(CoreError::Config("max_iter must be at least 1".into()));
        }
        if self.buffer_size_mib == 0 {
            return Err(CoreError::Config("buffer_size_mib must be at least 1".into()));
        }
        if !(self.gamma > 1.0) {
            return Err(CoreError::Config(format!("gamma must exceed 1, got {}", self.gamma)));
        }
        if self.overshoot_tolerance < 0.0 {
            return Err(CoreError::Config(format!(
                "overshoot_tolerance must be non-negative, got {}",
                self.overshoot_tolerance
            )));
        }
        if !(self.sink_ngb_factor > 0.0) {
            return Err(CoreError::Config(format!(
                "sink_ngb_factor must be positive, got {}",
                self.sink_ngb_factor
            )));
        }
        Ok(())
    }
}
