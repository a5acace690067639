//! Seeded generation of star systems: masses, radii and initial orbits.
//!
//! Names are placeholders; giving bodies content is up to the caller.

use std::{f64::consts, ops::Range};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    arena::IdLike,
    bodies::{BodyId, BodyKind, OrbitalBody},
    error::{OrbitError, Result},
    kepler::Orbit,
    manager::OrbitalMechanics,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarSystemConfig {
    pub seed: u64,
    pub name: String,
    /// Star mass (kg)
    pub star_mass: Range<f64>,
    /// Star radius (km)
    pub star_radius: Range<f64>,
    /// Number of planets, upper bound exclusive.
    pub planets: Range<usize>,
    /// Planet mass (kg)
    pub planet_mass: Range<f64>,
    /// Planet radius (km)
    pub planet_radius: Range<f64>,
    /// Semi-major axis of the innermost planet (km)
    pub inner_orbit: Range<f64>,
    /// Ratio between successive semi-major axes.
    pub spacing: Range<f64>,
    pub max_eccentricity: f64,
    /// Largest inclination (degrees)
    pub max_inclination: f64,
    /// Sidereal rotation period (hours)
    pub rotation_period: Range<f64>,
    /// Axial tilt (degrees)
    pub axial_tilt: Range<f64>,
}

impl Default for StarSystemConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            name: "Star".into(),
            star_mass: 1.0e30..3.0e30,
            star_radius: 5.0e5..9.0e5,
            planets: 3..9,
            planet_mass: 1.0e23..2.0e27,
            planet_radius: 2.0e3..7.0e4,
            inner_orbit: 4.0e7..8.0e7,
            spacing: 1.4..2.0,
            max_eccentricity: 0.1,
            max_inclination: 5.0,
            rotation_period: 10.0..100.0,
            axial_tilt: 0.0..30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanetarySystemConfig {
    pub seed: u64,
    /// Number of moons, upper bound exclusive.
    pub moons: Range<usize>,
    /// Moon mass as a fraction of the planet's.
    pub mass_ratio: Range<f64>,
    /// Moon radius (km)
    pub moon_radius: Range<f64>,
    /// Innermost semi-major axis in planet radii.
    pub inner_orbit: Range<f64>,
    pub spacing: Range<f64>,
    /// Moons are kept within this fraction of the planet's SOI.
    pub max_soi_fraction: f64,
    pub max_eccentricity: f64,
    /// Largest inclination (degrees)
    pub max_inclination: f64,
}

impl Default for PlanetarySystemConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            moons: 0..4,
            mass_ratio: 1.0e-6..1.0e-2,
            moon_radius: 100.0..2500.0,
            inner_orbit: 5.0..15.0,
            spacing: 1.5..2.5,
            max_soi_fraction: 0.5,
            max_eccentricity: 0.05,
            max_inclination: 10.0,
        }
    }
}

/// A uniform sample, or `range.start` for an empty range.
fn sample(rng: &mut StdRng, range: &Range<f64>) -> f64 {
    if range.start < range.end {
        rng.gen_range(range.clone())
    } else {
        range.start
    }
}

fn sample_count(rng: &mut StdRng, range: &Range<usize>) -> usize {
    if range.start < range.end {
        rng.gen_range(range.clone())
    } else {
        range.start
    }
}

/// Random orbit orientation and phase for a semi-major axis `a`.
fn random_orbit(rng: &mut StdRng, mu: f64, a: f64, max_e: f64, max_i: f64) -> Result<Orbit> {
    let e = sample(rng, &(0.0..max_e.clamp(0.0, 0.99)));
    let i = sample(rng, &(0.0..max_i.max(0.0))).to_radians();
    let lan = rng.gen_range(0.0..consts::TAU);
    let argpe = rng.gen_range(0.0..consts::TAU);
    let ta = rng.gen_range(0.0..consts::TAU);
    Orbit::new(mu, a, e, i, lan, argpe, ta).map_err(|reason| OrbitError::InvalidState(format!("generated orbit: {reason}")))
}

fn check_positive(what: &str, range: &Range<f64>) -> Result<()> {
    if range.start.is_finite() && range.end.is_finite() && range.start > 0.0 {
        Ok(())
    } else {
        Err(OrbitError::InvalidState(format!("{what} range must be positive")))
    }
}

/// Bodies orbiting the same primary are named after it with a letter
/// suffix, starting at `b`.
fn child_name(parent: &str, index: usize) -> String {
    let suffix = (b'b'..=b'z').map(char::from).nth(index).map_or_else(|| format!("{}", index + 1), String::from);
    format!("{parent} {suffix}")
}

/// Unregister freshly generated bodies, satellites first.
fn roll_back(sim: &mut OrbitalMechanics, ids: &[BodyId]) {
    for &id in ids.iter().rev() {
        if let Err(err) = sim.unregister_body(id) {
            warn!(%err, %id, "could not roll back generated body");
        }
    }
}

/// Register a star and its planets, returning their IDs (star first).
/// Nothing stays registered if any body fails.
pub fn generate_star_system(sim: &mut OrbitalMechanics, config: &StarSystemConfig) -> Result<Vec<BodyId>> {
    let mut ids = vec![];
    match register_star_system(sim, config, &mut ids) {
        Ok(()) => Ok(ids),
        Err(err) => {
            roll_back(sim, &ids);
            Err(err)
        }
    }
}

fn register_star_system(sim: &mut OrbitalMechanics, config: &StarSystemConfig, ids: &mut Vec<BodyId>) -> Result<()> {
    for (what, range) in [
        ("star mass", &config.star_mass),
        ("star radius", &config.star_radius),
        ("planet mass", &config.planet_mass),
        ("planet radius", &config.planet_radius),
        ("inner orbit", &config.inner_orbit),
    ] {
        check_positive(what, range)?;
    }
    if config.spacing.start <= 1.0 {
        return Err(OrbitError::InvalidState("orbit spacing must exceed 1".into()));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let star_mass = sample(&mut rng, &config.star_mass);
    let star = OrbitalBody::new(config.name.clone(), BodyKind::Star, star_mass, sample(&mut rng, &config.star_radius))
        .with_rotation(sample(&mut rng, &config.rotation_period), sample(&mut rng, &config.axial_tilt));
    let mu = star.mu();
    let star_id = sim.register_body(star)?;
    ids.push(star_id);

    let count = sample_count(&mut rng, &config.planets);
    let mut a = sample(&mut rng, &config.inner_orbit);
    for k in 0..count {
        if k > 0 {
            a *= sample(&mut rng, &config.spacing);
        }
        let orbit = random_orbit(&mut rng, mu, a, config.max_eccentricity, config.max_inclination)?;
        let kind = if k % 3 == 2 { BodyKind::DwarfPlanet } else { BodyKind::Planet };
        let planet = OrbitalBody::new(
            child_name(&config.name, k),
            kind,
            sample(&mut rng, &config.planet_mass),
            sample(&mut rng, &config.planet_radius),
        )
        .with_rotation(sample(&mut rng, &config.rotation_period), sample(&mut rng, &config.axial_tilt))
        .with_elements(star_id, orbit);
        let id = sim.register_body(planet)?;
        debug!(%id, a, e = orbit.e, "generated planet");
        ids.push(id);
    }
    info!(star = %star_id, planets = count, seed = config.seed, "generated star system");
    Ok(())
}

/// Register moons around `planet`, returning their IDs. Nothing stays
/// registered if any moon fails.
pub fn generate_planetary_system(
    sim: &mut OrbitalMechanics,
    planet: BodyId,
    config: &PlanetarySystemConfig,
) -> Result<Vec<BodyId>> {
    let mut ids = vec![];
    match register_planetary_system(sim, planet, config, &mut ids) {
        Ok(()) => Ok(ids),
        Err(err) => {
            roll_back(sim, &ids);
            Err(err)
        }
    }
}

fn register_planetary_system(
    sim: &mut OrbitalMechanics,
    planet: BodyId,
    config: &PlanetarySystemConfig,
    ids: &mut Vec<BodyId>,
) -> Result<()> {
    for (what, range) in [
        ("mass ratio", &config.mass_ratio),
        ("moon radius", &config.moon_radius),
        ("inner orbit", &config.inner_orbit),
    ] {
        check_positive(what, range)?;
    }
    if config.spacing.start <= 1.0 {
        return Err(OrbitError::InvalidState("orbit spacing must exceed 1".into()));
    }
    let primary = sim.get_body(planet).ok_or(OrbitError::UnknownBody(planet))?;
    let (name, mass, radius, mu) = (primary.name.clone(), primary.mass(), primary.radius, primary.mu());
    if mu <= 0.0 || radius <= 0.0 {
        return Err(OrbitError::InvalidState(format!("body {planet} cannot hold moons")));
    }
    let limit = sim.soi_radius(planet).unwrap_or(f64::INFINITY) * config.max_soi_fraction;

    let mut rng = StdRng::seed_from_u64(config.seed ^ planet.into_raw());
    let count = sample_count(&mut rng, &config.moons);
    let mut a = sample(&mut rng, &config.inner_orbit) * radius;
    for k in 0..count {
        if k > 0 {
            a *= sample(&mut rng, &config.spacing);
        }
        if a > limit {
            debug!(%planet, a, limit, "no room for further moons");
            break;
        }
        let orbit = random_orbit(&mut rng, mu, a, config.max_eccentricity, config.max_inclination)?;
        let moon_radius = sample(&mut rng, &config.moon_radius).min(radius);
        let moon = OrbitalBody::new(
            child_name(&name, k),
            BodyKind::Moon,
            mass * sample(&mut rng, &config.mass_ratio),
            moon_radius,
        )
        .with_elements(planet, orbit);
        let id = sim.register_body(moon)?;
        debug!(%id, a, "generated moon");
        ids.push(id);
    }
    info!(%planet, moons = ids.len(), "generated planetary system");
    Ok(())
}

impl OrbitalMechanics {
    pub fn generate_star_system(&mut self, config: &StarSystemConfig) -> Result<Vec<BodyId>> {
        generate_star_system(self, config)
    }

    pub fn generate_planetary_system(&mut self, planet: BodyId, config: &PlanetarySystemConfig) -> Result<Vec<BodyId>> {
        generate_planetary_system(self, planet, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bodies::OrbitMode;

    #[test]
    fn same_seed_same_system() {
        let config = StarSystemConfig {
            seed: 7,
            ..StarSystemConfig::default()
        };
        let mut first = OrbitalMechanics::default();
        let mut second = OrbitalMechanics::default();
        first.generate_star_system(&config).unwrap();
        second.generate_star_system(&config).unwrap();
        assert_eq!(first.save_orbital_state(), second.save_orbital_state());
    }

    #[test]
    fn planets_orbit_the_star_in_order() {
        let mut sim = OrbitalMechanics::default();
        let config = StarSystemConfig {
            seed: 3,
            planets: 5..6,
            ..StarSystemConfig::default()
        };
        let ids = sim.generate_star_system(&config).unwrap();
        assert_eq!(ids.len(), 6);
        let star = ids[0];
        assert_eq!(sim.get_body(star).unwrap().mode(), OrbitMode::Root);
        let axes = ids[1..]
            .iter()
            .map(|&id| {
                let body = sim.get_body(id).unwrap();
                assert_eq!(body.orbit_target(), Some(star));
                body.elements().unwrap().a
            })
            .collect::<Vec<_>>();
        assert!(axes.windows(2).all(|w| w[1] > w[0] * 1.39));
        assert_eq!(sim.get_body(ids[1]).unwrap().name, "Star b");
    }

    #[test]
    fn moons_stay_inside_soi() {
        let mut sim = OrbitalMechanics::default();
        let ids = sim
            .generate_star_system(&StarSystemConfig {
                seed: 11,
                planets: 1..2,
                ..StarSystemConfig::default()
            })
            .unwrap();
        let planet = ids[1];
        let config = PlanetarySystemConfig {
            seed: 5,
            moons: 6..7,
            ..PlanetarySystemConfig::default()
        };
        let moons = sim.generate_planetary_system(planet, &config).unwrap();
        let soi = sim.soi_radius(planet).unwrap();
        for moon in moons {
            let body = sim.get_body(moon).unwrap();
            assert_eq!(body.kind, BodyKind::Moon);
            assert!(body.elements().unwrap().apoapsis_radius() < soi);
            assert!(sim.is_in_sphere_of_influence(&body.position, planet));
        }
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let mut sim = OrbitalMechanics::default();
        let config = StarSystemConfig {
            star_mass: -1.0..1.0,
            ..StarSystemConfig::default()
        };
        assert!(matches!(sim.generate_star_system(&config), Err(OrbitError::InvalidState(_))));
        assert_eq!(sim.body_count(), 0);
        assert!(sim
            .generate_planetary_system(BodyId::default(), &PlanetarySystemConfig::default())
            .is_err());
    }

    #[test]
    fn failed_generation_leaves_nothing_behind() {
        let mut sim = OrbitalMechanics::default();
        let runaway = StarSystemConfig {
            planets: 400..401,
            spacing: 2.0..2.0,
            ..StarSystemConfig::default()
        };
        assert!(sim.generate_star_system(&runaway).is_err());
        assert_eq!(sim.body_count(), 0);

        let ids = sim
            .generate_star_system(&StarSystemConfig {
                planets: 1..2,
                ..StarSystemConfig::default()
            })
            .unwrap();
        let crowded = PlanetarySystemConfig {
            moons: 400..401,
            spacing: 2.0..2.0,
            max_soi_fraction: f64::INFINITY,
            ..PlanetarySystemConfig::default()
        };
        assert!(sim.generate_planetary_system(ids[1], &crowded).is_err());
        assert_eq!(sim.body_count(), 2);
    }
}
