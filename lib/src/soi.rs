//! Sphere-of-influence resolution for patched conics.

use nalgebra::Vector3;
use ordered_float::OrderedFloat;
use tracing::trace;

use crate::{
    bodies::{is_ancestor, root_of, BodyId, OrbitMode, OrbitalBody, Registry},
    spatial::Octree,
};

/// Exponent of the Laplace SOI approximation `a·(m/M)^(2/5)`.
const SOI_EXPONENT: f64 = 2.0 / 5.0;

/// Radius of `body`'s sphere of influence (km).
///
/// `None` for bodies that exert no gravity, infinite for bodies without an
/// orbit target (tree roots).
pub fn soi_radius(registry: &Registry, body: &OrbitalBody, min_source_mass: f64) -> Option<f64> {
    if !body.is_gravity_source(min_source_mass) {
        return None;
    }
    let Some(primary) = body.orbit_target.and_then(|t| registry.get(t)) else {
        return Some(f64::INFINITY);
    };
    let a = match (body.mode, body.elements.as_ref()) {
        (OrbitMode::Orbit, Some(orbit)) => orbit.a,
        _ => (body.position - primary.position).norm(),
    };
    if primary.mass() <= 0.0 {
        return Some(f64::INFINITY);
    }
    Some(a * libm::pow(body.mass() / primary.mass(), SOI_EXPONENT))
}

/// Answers "which body dominates here" from borrowed registry and index
/// state.
pub struct SoiResolver<'a> {
    registry: &'a Registry,
    index: &'a Octree,
    min_source_mass: f64,
    hysteresis: f64,
    /// Largest finite SOI radius, bounding the candidate search.
    max_radius: f64,
    /// Extra search distance covering bodies that moved since the index
    /// was last updated.
    padding: f64,
}

impl<'a> SoiResolver<'a> {
    pub fn new(registry: &'a Registry, index: &'a Octree, min_source_mass: f64, hysteresis: f64) -> Self {
        let max_radius = registry
            .values()
            .filter_map(|b| soi_radius(registry, b, min_source_mass))
            .filter(|r| r.is_finite())
            .fold(0.0, f64::max);
        Self {
            registry,
            index,
            min_source_mass,
            hysteresis,
            max_radius,
            padding: 0.0,
        }
    }

    #[must_use]
    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = padding.max(0.0);
        self
    }

    pub fn max_radius(&self) -> f64 {
        self.max_radius
    }

    pub fn soi_radius(&self, id: BodyId) -> Option<f64> {
        soi_radius(self.registry, self.registry.get(id)?, self.min_source_mass)
    }

    /// Whether `position` lies inside `id`'s sphere of influence.
    pub fn is_in_soi(&self, position: &Vector3<f64>, id: BodyId) -> bool {
        let Some(body) = self.registry.get(id) else {
            return false;
        };
        self.soi_radius(id)
            .is_some_and(|soi| (body.position - position).norm() <= soi)
    }

    /// Finite-SOI bodies whose sphere contains `position` after scaling
    /// the radius by `scale`, as `(radius, id)`.
    fn containing(&self, position: &Vector3<f64>, scale: f64) -> impl Iterator<Item = (f64, BodyId)> + '_ {
        let reach = self.max_radius * scale.max(1.0) + self.padding;
        let position = *position;
        self.index
            .query(&position, reach)
            .into_iter()
            .filter_map(move |id| {
                let body = self.registry.get(id)?;
                let soi = soi_radius(self.registry, body, self.min_source_mass)?;
                (soi.is_finite() && (body.position - position).norm() <= soi * scale)
                    .then_some((soi, id))
            })
    }

    /// The root nearest to `position`.
    fn nearest_root(&self, position: &Vector3<f64>) -> Option<BodyId> {
        self.registry
            .iter()
            .filter(|(_, b)| b.orbit_target.is_none())
            .min_by_key(|(id, b)| (OrderedFloat((b.position - position).norm()), *id))
            .map(|(id, _)| id)
    }

    /// The innermost body whose SOI contains `position`; the nearest root
    /// if no finite SOI does.
    pub fn dominant_body(&self, position: &Vector3<f64>) -> Option<BodyId> {
        self.containing(position, 1.0)
            .min_by_key(|&(soi, id)| (OrderedFloat(soi), id))
            .map(|(_, id)| id)
            .or_else(|| self.nearest_root(position))
    }

    /// The orbit target `id` should have given its current position, if it
    /// differs from the present one.
    ///
    /// The current target is kept until the body is outside its SOI by the
    /// hysteresis margin, and a new SOI must be entered by the same margin.
    /// A body never adopts itself or one of its own satellites.
    pub fn resolve_transition(&self, id: BodyId) -> Option<BodyId> {
        let body = self.registry.get(id)?;
        if matches!(body.mode, OrbitMode::Root | OrbitMode::Landed) {
            return None;
        }
        let current = body.orbit_target?;
        let position = body.position;

        let mut best: Option<(f64, BodyId)> = self.registry.get(current).and_then(|target| {
            let soi = soi_radius(self.registry, target, self.min_source_mass)?;
            let inside = soi.is_infinite()
                || (target.position - position).norm() <= soi * (1.0 + self.hysteresis);
            inside.then_some((soi, current))
        });

        for (soi, candidate) in self.containing(&position, 1.0 - self.hysteresis) {
            if candidate == id || candidate == current || is_ancestor(self.registry, id, candidate) {
                continue;
            }
            if best.map_or(true, |(b, bid)| (OrderedFloat(soi), candidate) < (OrderedFloat(b), bid)) {
                best = Some((soi, candidate));
            }
        }

        let chosen = match best {
            Some((_, chosen)) => chosen,
            None => root_of(self.registry, current)?,
        };
        trace!(%id, %current, %chosen, "resolved SOI owner");
        (chosen != current).then_some(chosen)
    }
}
