//! Gravitational acceleration under the three fidelity modes.

use itertools::Itertools;
use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bodies::{BodyId, OrbitalBody, Registry};

/// Newtonian constant of gravitation (`m^3/(kg·s^2)`).
pub const G: f64 = 6.674_30e-11;

/// `G·M` converted to `km^3/s^2`.
pub fn mu_from_mass(mass: f64) -> f64 {
    G * mass * 1e-9
}

/// Fidelity of the gravity computation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GravityMode {
    /// Pull from the body's orbit target only; targets never change.
    PrimaryOnly,
    /// Pull from the orbit target, re-selected each tick as the body moves
    /// between spheres of influence.
    #[default]
    PatchedConics,
    /// Sum over every gravity source. O(N²) per tick.
    NBody,
}

/// Computes accelerations from borrowed registry state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GravityModel {
    /// Bodies at or below this mass (kg) never act as sources.
    pub min_source_mass: f64,
    /// Upper bound on N-body sources; the heaviest are kept. Zero means
    /// unbounded.
    pub nbody_max_sources: usize,
}

impl Default for GravityModel {
    fn default() -> Self {
        Self {
            min_source_mass: 1.0e3,
            nbody_max_sources: 0,
        }
    }
}

impl GravityModel {
    /// IDs of the bodies that act as N-body sources, heaviest first.
    pub fn sources(&self, registry: &Registry) -> Vec<BodyId> {
        let mut sources = registry
            .iter()
            .filter(|(_, b)| b.is_gravity_source(self.min_source_mass))
            .sorted_by_key(|(id, b)| (std::cmp::Reverse(OrderedFloat(b.mass())), *id))
            .map(|(id, _)| id)
            .collect_vec();
        if self.nbody_max_sources > 0 && sources.len() > self.nbody_max_sources {
            debug!(
                total = sources.len(),
                kept = self.nbody_max_sources,
                "capping N-body gravity sources"
            );
            sources.truncate(self.nbody_max_sources);
        }
        sources
    }

    /// Acceleration (`km/s^2`) on `body` at its current position.
    pub fn acceleration(&self, body: &OrbitalBody, registry: &Registry, mode: GravityMode) -> Vector3<f64> {
        match mode {
            GravityMode::PrimaryOnly | GravityMode::PatchedConics => {
                self.primary_acceleration(body, body.position, registry)
            }
            GravityMode::NBody => {
                let sources = self.sources(registry);
                self.nbody_acceleration(body, body.position, registry, &sources)
            }
        }
    }

    /// Pull of `body`'s orbit target on a point at `position`.
    pub fn primary_acceleration(
        &self,
        body: &OrbitalBody,
        position: Vector3<f64>,
        registry: &Registry,
    ) -> Vector3<f64> {
        body.orbit_target
            .and_then(|target| registry.get(target))
            .filter(|target| target.is_gravity_source(self.min_source_mass))
            .map_or_else(Vector3::zeros, |target| {
                point_acceleration(position, body.radius, target)
            })
    }

    /// Summed pull of `sources` on a point at `position`, skipping `body`
    /// itself.
    pub fn nbody_acceleration(
        &self,
        body: &OrbitalBody,
        position: Vector3<f64>,
        registry: &Registry,
        sources: &[BodyId],
    ) -> Vector3<f64> {
        sources
            .iter()
            .filter(|&&id| Some(id) != body.id)
            .filter_map(|&id| registry.get(id))
            .map(|source| point_acceleration(position, body.radius, source))
            .sum()
    }
}

/// Acceleration towards `source` felt at `position` by a body of radius
/// `radius`.
///
/// The distance is floored at the combined radii so overlapping bodies
/// see a bounded pull; exactly coincident positions contribute nothing.
pub fn point_acceleration(position: Vector3<f64>, radius: f64, source: &OrbitalBody) -> Vector3<f64> {
    let d = source.position - position;
    let r = d.norm();
    if r <= 0.0 || !r.is_finite() {
        return Vector3::zeros();
    }
    let r_eff = r.max(radius + source.radius);
    d * (source.mu() / (r * r_eff * r_eff))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::bodies::BodyKind;

    const EARTH_MASS: f64 = 5.972e24;

    fn registry_with(bodies: Vec<OrbitalBody>) -> (Registry, Vec<BodyId>) {
        let mut registry = Registry::new();
        let ids = bodies
            .into_iter()
            .map(|mut b| {
                let id = registry.reserve_id();
                b.id = Some(id);
                registry.insert(id, b);
                id
            })
            .collect();
        (registry, ids)
    }

    #[test]
    fn mu_matches_earth() {
        assert_relative_eq!(mu_from_mass(EARTH_MASS), 398_600.0, max_relative = 1e-3);
    }

    #[test]
    fn primary_only_points_at_target() {
        let earth = OrbitalBody::new("Earth", BodyKind::Planet, EARTH_MASS, 6371.0);
        let (mut registry, ids) = registry_with(vec![earth]);
        let mut ship = OrbitalBody::new("Ship", BodyKind::Spacecraft, 1.0e4, 0.01)
            .with_position(Vector3::new(7000.0, 0.0, 0.0))
            .orbiting(ids[0]);
        let ship_id = registry.reserve_id();
        ship.id = Some(ship_id);
        registry.insert(ship_id, ship.clone());

        let model = GravityModel::default();
        let a = model.acceleration(&ship, &registry, GravityMode::PrimaryOnly);
        let mu = registry[ids[0]].mu();
        assert_relative_eq!(a, Vector3::new(-mu / 7000.0f64.powi(2), 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn nbody_sums_sources_and_ignores_self() {
        let a = OrbitalBody::new("A", BodyKind::Planet, EARTH_MASS, 1.0)
            .with_position(Vector3::new(-1000.0, 0.0, 0.0));
        let b = OrbitalBody::new("B", BodyKind::Planet, EARTH_MASS, 1.0)
            .with_position(Vector3::new(1000.0, 0.0, 0.0));
        let probe = OrbitalBody::new("Probe", BodyKind::Planet, EARTH_MASS, 1.0);
        let (registry, ids) = registry_with(vec![a, b, probe]);
        let model = GravityModel::default();

        // Symmetric pulls cancel at the midpoint.
        let at_mid = model.acceleration(&registry[ids[2]], &registry, GravityMode::NBody);
        assert_relative_eq!(at_mid.norm(), 0.0, epsilon = 1e-15);

        let on_a = model.acceleration(&registry[ids[0]], &registry, GravityMode::NBody);
        let mu = mu_from_mass(EARTH_MASS);
        let expected = mu / 1000.0f64.powi(2) + mu / 2000.0f64.powi(2);
        assert_relative_eq!(on_a[0], expected, max_relative = 1e-12);
    }

    #[test]
    fn light_bodies_are_not_sources() {
        let ship = OrbitalBody::new("Ship", BodyKind::Spacecraft, 1.0e4, 0.01)
            .with_gravity(true)
            .with_position(Vector3::new(10.0, 0.0, 0.0));
        let probe = OrbitalBody::new("Probe", BodyKind::Spacecraft, 1.0e4, 0.01);
        let (registry, ids) = registry_with(vec![ship, probe]);
        let model = GravityModel {
            min_source_mass: 1.0e5,
            nbody_max_sources: 0,
        };
        assert!(model.sources(&registry).is_empty());
        let a = model.acceleration(&registry[ids[1]], &registry, GravityMode::NBody);
        assert_eq!(a, Vector3::zeros());
    }

    #[test]
    fn coincident_bodies_do_not_blow_up() {
        let source = OrbitalBody::new("Src", BodyKind::Planet, EARTH_MASS, 100.0);
        let a = point_acceleration(Vector3::zeros(), 1.0, &source);
        assert_eq!(a, Vector3::zeros());

        // Inside the combined radii the pull is clamped at the floor.
        let near = point_acceleration(Vector3::new(1e-6, 0.0, 0.0), 1.0, &source);
        assert!(near.iter().all(|x| x.is_finite()));
        assert_relative_eq!(near.norm(), source.mu() / 101.0f64.powi(2), max_relative = 1e-9);
    }

    #[test]
    fn source_cap_keeps_heaviest() {
        let bodies = (1..=5)
            .map(|k| OrbitalBody::new(format!("B{k}"), BodyKind::Asteroid, k as f64 * 1e20, 1.0))
            .collect();
        let (registry, ids) = registry_with(bodies);
        let model = GravityModel {
            min_source_mass: 0.0,
            nbody_max_sources: 2,
        };
        assert_eq!(model.sources(&registry), vec![ids[4], ids[3]]);
    }
}
