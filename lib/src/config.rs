//! Simulation settings.
//!
//! Every field has a default, so a scenario file only needs to name the
//! settings it changes.

use serde::{Deserialize, Serialize};

use crate::{
    gravity::{GravityMode, GravityModel},
    kepler::KeplerPropagator,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub gravity_mode: GravityMode,
    /// Longest step (s) a single propagation call may take; longer ticks
    /// are subdivided.
    pub max_time_step: f64,
    /// Cap on substeps per tick. Past this the step length grows instead.
    pub max_substeps: u32,
    /// Global multiplier on the caller's tick length.
    pub time_warp: f64,
    /// Bodies at or below this mass (kg) exert no gravity.
    pub min_source_mass: f64,
    /// Cap on N-body sources, heaviest first; zero is unbounded.
    pub nbody_max_sources: usize,
    pub kepler: KeplerSettings,
    pub soi: SoiSettings,
    pub octree: OctreeSettings,
    pub settle: SettleSettings,
    pub window: WindowSettings,
    /// Run the broad-phase collision pass each tick.
    pub collisions: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gravity_mode: GravityMode::default(),
            max_time_step: 10.0,
            max_substeps: 10_000,
            time_warp: 1.0,
            min_source_mass: 1.0e3,
            nbody_max_sources: 0,
            kepler: KeplerSettings::default(),
            soi: SoiSettings::default(),
            octree: OctreeSettings::default(),
            settle: SettleSettings::default(),
            window: WindowSettings::default(),
            collisions: true,
        }
    }
}

impl SimConfig {
    pub fn gravity_model(&self) -> GravityModel {
        GravityModel {
            min_source_mass: self.min_source_mass,
            nbody_max_sources: self.nbody_max_sources,
        }
    }

    pub fn propagator(&self) -> KeplerPropagator {
        KeplerPropagator::new(self.kepler.tolerance, self.kepler.max_iter)
    }

    /// Replace unusable values with defaults, returning the names of the
    /// fields that were reset.
    pub fn sanitize(&mut self) -> Vec<&'static str> {
        let defaults = Self::default();
        let mut reset = vec![];
        if !(self.max_time_step.is_finite() && self.max_time_step > 0.0) {
            self.max_time_step = defaults.max_time_step;
            reset.push("max_time_step");
        }
        if self.max_substeps == 0 {
            self.max_substeps = defaults.max_substeps;
            reset.push("max_substeps");
        }
        if !(self.time_warp.is_finite() && self.time_warp > 0.0) {
            self.time_warp = defaults.time_warp;
            reset.push("time_warp");
        }
        if !(self.kepler.tolerance.is_finite() && self.kepler.tolerance > 0.0) {
            self.kepler.tolerance = defaults.kepler.tolerance;
            reset.push("kepler.tolerance");
        }
        if !(0.0..0.5).contains(&self.soi.hysteresis) {
            self.soi.hysteresis = defaults.soi.hysteresis;
            reset.push("soi.hysteresis");
        }
        if self.octree.leaf_capacity == 0 {
            self.octree.leaf_capacity = defaults.octree.leaf_capacity;
            reset.push("octree.leaf_capacity");
        }
        if self.window.scan_steps < 2 {
            self.window.scan_steps = defaults.window.scan_steps;
            reset.push("window.scan_steps");
        }
        if !(self.window.angular_tolerance.is_finite() && self.window.angular_tolerance > 0.0) {
            self.window.angular_tolerance = defaults.window.angular_tolerance;
            reset.push("window.angular_tolerance");
        }
        reset
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeplerSettings {
    /// Newton-Raphson tolerance on the eccentric anomaly (rad).
    pub tolerance: f64,
    pub max_iter: u32,
}

impl Default for KeplerSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iter: 30,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoiSettings {
    /// Fractional margin a body must cross an SOI boundary by before it is
    /// re-parented.
    pub hysteresis: f64,
}

impl Default for SoiSettings {
    fn default() -> Self {
        Self { hysteresis: 0.01 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeSettings {
    pub leaf_capacity: usize,
    pub max_depth: u8,
}

impl Default for OctreeSettings {
    fn default() -> Self {
        Self {
            leaf_capacity: 8,
            max_depth: 16,
        }
    }
}

/// When a ballistic body counts as having settled into an orbit.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleSettings {
    pub enabled: bool,
    /// Consecutive ticks the elements must agree for.
    pub ticks: u32,
    /// Allowed relative change in `a` and absolute change in `e` between
    /// ticks.
    pub tolerance: f64,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ticks: 5,
            tolerance: 1e-4,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Samples across the search horizon when bracketing phase matches.
    pub scan_steps: u32,
    /// Acceptable phase-angle error at the window (rad).
    pub angular_tolerance: f64,
    /// Iteration cap for the root refinement.
    pub max_iters: u64,
    /// The horizon is capped at this many multiples of the longer orbital
    /// period, bounding near-equal-period searches.
    pub max_search_periods: f64,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            scan_steps: 720,
            angular_tolerance: 1e-6,
            max_iters: 100,
            max_search_periods: 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_resets_bad_values() {
        let mut config = SimConfig {
            max_time_step: -1.0,
            time_warp: f64::NAN,
            ..SimConfig::default()
        };
        config.soi.hysteresis = 3.0;
        let reset = config.sanitize();
        assert_eq!(reset, vec!["max_time_step", "time_warp", "soi.hysteresis"]);
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn defaults_are_already_sane() {
        let mut config = SimConfig::default();
        assert!(config.sanitize().is_empty());
    }
}
