//! Orbital body records and the orbit-mode state machine.

use std::{f64::consts, fmt};

use nalgebra::{Rotation3, Unit, Vector3};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    arena::{Arena, IdLike},
    error::{OrbitError, Result},
    gravity,
    kepler::Orbit,
};

/// The canonical body registry.
pub type Registry = Arena<BodyId, OrbitalBody>;

/// Stable handle to a registered body.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BodyId(u64);

impl IdLike for BodyId {
    fn from_raw(index: u64) -> Self {
        Self(index)
    }

    fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum BodyKind {
    Star = 0,
    Planet = 1,
    Moon = 2,
    DwarfPlanet = 3,
    Asteroid = 4,
    Comet = 5,
    Spacecraft = 6,
    Debris = 7,
}

impl BodyKind {
    /// Whether bodies of this kind attract others by default.
    pub fn is_gravity_source(self) -> bool {
        !matches!(self, BodyKind::Spacecraft | BodyKind::Debris)
    }

    /// Everything but debris needs a positive mass and radius when it
    /// exerts gravity.
    pub fn requires_extent(self) -> bool {
        self != BodyKind::Debris
    }
}

/// How a body's motion is currently computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitMode {
    /// Anchor of an orbit tree; never transitions.
    Root,
    /// On rails along its osculating ellipse.
    Orbit,
    /// Free flight integrated under gravity.
    Ballistic,
    /// Free flight with a commanded acceleration.
    Thrust,
    /// Fixed to the surface of its orbit target.
    Landed,
}

impl OrbitMode {
    fn reject(self, body: BodyId, operation: &'static str) -> OrbitError {
        OrbitError::InvalidTransition {
            body,
            mode: self,
            operation,
        }
    }

    /// An impulse knocks a body off its closed-form ellipse.
    pub fn apply_impulse(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Orbit | OrbitMode::Ballistic => Ok(OrbitMode::Ballistic),
            OrbitMode::Thrust => Ok(OrbitMode::Thrust),
            OrbitMode::Root | OrbitMode::Landed => Err(self.reject(body, "apply an impulse")),
        }
    }

    pub fn land(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Orbit | OrbitMode::Ballistic | OrbitMode::Thrust => Ok(OrbitMode::Landed),
            OrbitMode::Root | OrbitMode::Landed => Err(self.reject(body, "land")),
        }
    }

    pub fn take_off(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Landed => Ok(OrbitMode::Ballistic),
            _ => Err(self.reject(body, "take off")),
        }
    }

    /// Ballistic flight that settled into a consistent ellipse.
    pub fn establish_orbit(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Ballistic => Ok(OrbitMode::Orbit),
            _ => Err(self.reject(body, "establish an orbit")),
        }
    }

    /// Explicit initialization onto an ellipse (circular or from elements).
    pub fn set_orbit(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Orbit | OrbitMode::Ballistic | OrbitMode::Thrust => Ok(OrbitMode::Orbit),
            OrbitMode::Root | OrbitMode::Landed => Err(self.reject(body, "enter an orbit")),
        }
    }

    pub fn begin_thrust(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Orbit | OrbitMode::Ballistic | OrbitMode::Thrust => Ok(OrbitMode::Thrust),
            OrbitMode::Root | OrbitMode::Landed => Err(self.reject(body, "thrust")),
        }
    }

    pub fn end_thrust(self, body: BodyId) -> Result<OrbitMode> {
        match self {
            OrbitMode::Thrust => Ok(OrbitMode::Ballistic),
            _ => Err(self.reject(body, "end thrust")),
        }
    }

    /// Modes whose motion is integrated numerically.
    pub fn is_free_flight(self) -> bool {
        matches!(self, OrbitMode::Ballistic | OrbitMode::Thrust)
    }
}

/// Where a landed body sits on its target, in the target's body-fixed
/// frame at zero rotation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandedTransform {
    pub offset: Vector3<f64>,
}

/// Consecutive-tick element samples used to detect a ballistic body that
/// has settled into a stable ellipse.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettleTracker {
    pub a: f64,
    pub e: f64,
    pub ticks: u32,
}

/// Physical and orbital state of one body.
#[derive(Clone, Debug, PartialEq)]
pub struct OrbitalBody {
    pub(crate) id: Option<BodyId>,
    pub name: String,
    pub kind: BodyKind,
    /// Mass (`kg`)
    mass: f64,
    /// Cached standard gravitational parameter (`km^3/s^2`)
    mu: f64,
    /// Mean radius (`km`)
    pub radius: f64,
    /// Sidereal rotation period (`hours`); zero for no rotation
    rotation_period: f64,
    /// Spin axis tilt from the world +Z axis (`degrees`)
    axial_tilt: f64,
    /// Current rotation about the spin axis (`rad`)
    pub rotation_angle: f64,
    /// World-space position (`km`)
    pub position: Vector3<f64>,
    /// World-space velocity (`km/s`)
    pub velocity: Vector3<f64>,
    /// Spin vector (`rad/s`)
    angular_velocity: Vector3<f64>,
    /// Elements relative to `orbit_target`; valid in [`OrbitMode::Orbit`]
    pub(crate) elements: Option<Orbit>,
    pub(crate) orbit_target: Option<BodyId>,
    pub(crate) mode: OrbitMode,
    pub(crate) landed: Option<LandedTransform>,
    /// Commanded acceleration in [`OrbitMode::Thrust`] (`km/s^2`)
    pub(crate) thrust: Vector3<f64>,
    pub gravity_enabled: bool,
    /// Multiplier on the simulation step for this body's propagation.
    pub time_warp_factor: f64,
    pub(crate) settle: Option<SettleTracker>,
}

impl OrbitalBody {
    /// A new, unregistered root body at the origin.
    pub fn new(name: impl Into<String>, kind: BodyKind, mass: f64, radius: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            mass,
            mu: gravity::mu_from_mass(mass),
            radius,
            rotation_period: 0.0,
            axial_tilt: 0.0,
            rotation_angle: 0.0,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            elements: None,
            orbit_target: None,
            mode: OrbitMode::Root,
            landed: None,
            thrust: Vector3::zeros(),
            gravity_enabled: kind.is_gravity_source(),
            time_warp_factor: 1.0,
            settle: None,
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: Vector3<f64>) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    /// Spin with the given sidereal period (hours) about an axis tilted
    /// `axial_tilt` degrees from +Z towards +X.
    #[must_use]
    pub fn with_rotation(mut self, rotation_period: f64, axial_tilt: f64) -> Self {
        self.rotation_period = rotation_period;
        self.axial_tilt = axial_tilt;
        self.angular_velocity = spin_vector(rotation_period, axial_tilt);
        self
    }

    /// Fly free around `target`, using the world-space position and
    /// velocity as given.
    #[must_use]
    pub fn orbiting(mut self, target: BodyId) -> Self {
        self.orbit_target = Some(target);
        self.mode = OrbitMode::Ballistic;
        self.elements = None;
        self
    }

    /// Put the body on rails around `target`. Registration derives the
    /// position and velocity from the elements.
    #[must_use]
    pub fn with_elements(mut self, target: BodyId, elements: Orbit) -> Self {
        self.orbit_target = Some(target);
        self.mode = OrbitMode::Orbit;
        self.elements = Some(elements);
        self
    }

    #[must_use]
    pub fn with_gravity(mut self, enabled: bool) -> Self {
        self.gravity_enabled = enabled;
        self
    }

    /// The registry ID, once registered.
    pub fn id(&self) -> Option<BodyId> {
        self.id
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f64) {
        self.mass = mass;
        self.mu = gravity::mu_from_mass(mass);
    }

    /// Standard gravitational parameter `G·M` (`km^3/s^2`).
    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn rotation_period(&self) -> f64 {
        self.rotation_period
    }

    pub fn axial_tilt(&self) -> f64 {
        self.axial_tilt
    }

    pub fn angular_velocity(&self) -> Vector3<f64> {
        self.angular_velocity
    }

    pub fn mode(&self) -> OrbitMode {
        self.mode
    }

    pub fn orbit_target(&self) -> Option<BodyId> {
        self.orbit_target
    }

    /// Orbital elements relative to the orbit target. Only present in
    /// [`OrbitMode::Orbit`].
    pub fn elements(&self) -> Option<&Orbit> {
        self.elements.as_ref()
    }

    pub fn landed_transform(&self) -> Option<&LandedTransform> {
        self.landed.as_ref()
    }

    pub fn thrust(&self) -> Vector3<f64> {
        self.thrust
    }

    /// Whether this body pulls on others: gravity enabled and not
    /// negligibly light.
    pub fn is_gravity_source(&self, min_source_mass: f64) -> bool {
        self.gravity_enabled && self.mass > min_source_mass
    }

    /// Rotation taking body-fixed vectors to world space at the current
    /// spin angle.
    pub fn body_to_world(&self) -> Rotation3<f64> {
        let tilt = Rotation3::from_axis_angle(&Vector3::y_axis(), self.axial_tilt.to_radians());
        match Unit::try_new(self.angular_velocity, f64::EPSILON) {
            Some(axis) => Rotation3::from_axis_angle(&axis, self.rotation_angle) * tilt,
            None => tilt,
        }
    }

    pub(crate) fn has_finite_state(&self) -> bool {
        self.position
            .iter()
            .chain(self.velocity.iter())
            .all(|x| x.is_finite())
    }

    /// Check the physical invariants required for registration.
    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| OrbitError::InvalidBody {
            name: self.name.clone(),
            reason: reason.into(),
        };
        if !self.mass.is_finite() || self.mass < 0.0 {
            return Err(invalid("mass must be finite and non-negative"));
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(invalid("radius must be finite and non-negative"));
        }
        if self.kind.requires_extent()
            && self.gravity_enabled
            && (self.mass <= 0.0 || self.radius <= 0.0)
        {
            return Err(invalid("mass and radius must be positive"));
        }
        if self.gravity_enabled && self.mass <= 0.0 {
            return Err(invalid("gravity sources need a positive mass"));
        }
        if !self.has_finite_state() {
            return Err(invalid("position and velocity must be finite"));
        }
        if !(self.time_warp_factor.is_finite() && self.time_warp_factor > 0.0) {
            return Err(invalid("time warp factor must be positive"));
        }
        if !(self.rotation_period.is_finite() && self.rotation_period >= 0.0) {
            return Err(invalid("rotation period must be non-negative"));
        }
        match (self.mode, self.orbit_target) {
            (OrbitMode::Root, Some(_)) => Err(invalid("root bodies cannot have an orbit target")),
            (OrbitMode::Root, None) => Ok(()),
            (_, None) => Err(invalid("non-root bodies need an orbit target")),
            (OrbitMode::Orbit, Some(_)) if self.elements.is_none() => {
                Err(invalid("orbiting bodies need orbital elements"))
            }
            (OrbitMode::Landed, Some(_)) if self.landed.is_none() => {
                Err(invalid("landed bodies need a landed transform"))
            }
            _ => Ok(()),
        }
    }
}

/// Spin vector for a rotation period in hours and a tilt in degrees.
pub fn spin_vector(rotation_period: f64, axial_tilt: f64) -> Vector3<f64> {
    if !(rotation_period.is_finite() && rotation_period > 0.0) {
        return Vector3::zeros();
    }
    let rate = 2.0 * consts::PI / (rotation_period * 3600.0);
    let tilt = axial_tilt.to_radians();
    rate * Vector3::new(libm::sin(tilt), 0.0, libm::cos(tilt))
}

/// Depth of `id` in its orbit tree (roots are 0), or `None` if the target
/// chain is broken or cyclic.
pub fn orbit_depth(registry: &Registry, id: BodyId) -> Option<usize> {
    let mut depth = 0;
    let mut current = id;
    while let Some(target) = registry.get(current)?.orbit_target {
        depth += 1;
        if depth > registry.len() {
            return None;
        }
        current = target;
    }
    Some(depth)
}

/// The root at the end of `id`'s target chain.
pub fn root_of(registry: &Registry, id: BodyId) -> Option<BodyId> {
    let mut current = id;
    for _ in 0..=registry.len() {
        match registry.get(current)?.orbit_target {
            Some(target) => current = target,
            None => return Some(current),
        }
    }
    None
}

/// Whether `ancestor` appears on `id`'s target chain (a body is not its
/// own ancestor).
pub fn is_ancestor(registry: &Registry, ancestor: BodyId, id: BodyId) -> bool {
    let mut current = id;
    for _ in 0..=registry.len() {
        match registry.get(current).and_then(|b| b.orbit_target) {
            Some(target) if target == ancestor => return true,
            Some(target) => current = target,
            None => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_knocks_orbit_into_ballistic() {
        let id = BodyId(1);
        assert_eq!(OrbitMode::Orbit.apply_impulse(id), Ok(OrbitMode::Ballistic));
        assert_eq!(OrbitMode::Ballistic.apply_impulse(id), Ok(OrbitMode::Ballistic));
        assert_eq!(OrbitMode::Thrust.apply_impulse(id), Ok(OrbitMode::Thrust));
        assert!(OrbitMode::Root.apply_impulse(id).is_err());
        assert!(OrbitMode::Landed.apply_impulse(id).is_err());
    }

    #[test]
    fn landing_cycle() {
        let id = BodyId(3);
        let landed = OrbitMode::Thrust.land(id).unwrap();
        assert_eq!(landed, OrbitMode::Landed);
        assert!(landed.land(id).is_err());
        assert_eq!(landed.take_off(id), Ok(OrbitMode::Ballistic));
        assert!(OrbitMode::Orbit.take_off(id).is_err());
    }

    #[test]
    fn root_never_transitions() {
        let id = BodyId(0);
        let root = OrbitMode::Root;
        assert!(root.apply_impulse(id).is_err());
        assert!(root.land(id).is_err());
        assert!(root.take_off(id).is_err());
        assert!(root.establish_orbit(id).is_err());
        assert!(root.set_orbit(id).is_err());
        assert!(root.begin_thrust(id).is_err());
        assert!(root.end_thrust(id).is_err());
    }

    #[test]
    fn only_ballistic_settles_into_orbit() {
        let id = BodyId(2);
        assert_eq!(OrbitMode::Ballistic.establish_orbit(id), Ok(OrbitMode::Orbit));
        assert!(OrbitMode::Thrust.establish_orbit(id).is_err());
        assert!(OrbitMode::Orbit.establish_orbit(id).is_err());
    }

    #[test]
    fn kind_round_trips_through_u8() {
        let raw: u8 = BodyKind::Comet.into();
        assert_eq!(BodyKind::try_from(raw).unwrap(), BodyKind::Comet);
        assert!(BodyKind::try_from(42u8).is_err());
    }

    #[test]
    fn validation_rejects_massless_planets() {
        let planet = OrbitalBody::new("Nowhere", BodyKind::Planet, 0.0, 100.0);
        assert!(matches!(planet.validate(), Err(OrbitError::InvalidBody { .. })));
        let debris = OrbitalBody::new("Bolt", BodyKind::Debris, 0.0, 0.0).orbiting(BodyId(1));
        assert!(debris.validate().is_ok());
    }

    #[test]
    fn mass_updates_cached_mu() {
        let mut body = OrbitalBody::new("Rock", BodyKind::Asteroid, 1.0e20, 50.0);
        let before = body.mu();
        body.set_mass(2.0e20);
        assert!((body.mu() / before - 2.0).abs() < 1e-12);
    }

    #[test]
    fn spin_vector_follows_tilt() {
        let w = spin_vector(24.0, 90.0);
        assert!(w[2].abs() < 1e-15);
        assert!((w.norm() - 2.0 * consts::PI / 86_400.0).abs() < 1e-15);
        assert_eq!(spin_vector(0.0, 23.0), Vector3::zeros());
    }
}
