use std::path::PathBuf;

use orbtk::{
    generation::{PlanetarySystemConfig, StarSystemConfig},
    SimConfig,
};
use serde::{Deserialize, Serialize};

/// A TOML scenario: simulation settings, what to generate and how long to
/// run for.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub sim: SimConfig,
    pub star_system: StarSystemConfig,
    pub moons: PlanetarySystemConfig,
    pub run: RunSettings,
    pub probe: Option<ProbeSettings>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Length of each tick (s)
    pub tick: f64,
    pub ticks: u32,
    /// Log a status line every this many ticks; zero disables.
    pub report_every: u32,
    /// Start from a RON save instead of generating.
    pub load: Option<PathBuf>,
    /// Write a RON save when the run ends.
    pub save: Option<PathBuf>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            tick: 60.0,
            ticks: 1440,
            report_every: 60,
            load: None,
            save: None,
        }
    }
}

/// A spacecraft launched into a circular orbit around one of the generated
/// planets, then nudged off it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub name: String,
    /// Index of the planet, innermost first.
    pub planet: usize,
    /// Altitude above the planet's surface (km)
    pub altitude: f64,
    /// Prograde burn applied after one tick (km/s)
    pub burn: f64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            name: "Probe".into(),
            planet: 0,
            altitude: 500.0,
            burn: 0.1,
        }
    }
}
