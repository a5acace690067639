//! The orbital simulation service: owns the registry and drives the
//! per-tick pipeline.

mod sync;
mod tick;

use std::collections::BTreeSet;

use nalgebra::{Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use self::{
    sync::{Command, CommandQueue, Snapshot, SnapshotHandle},
    tick::TickReport,
};
use crate::{
    bodies::{is_ancestor, BodyId, LandedTransform, OrbitMode, OrbitalBody, Registry},
    config::SimConfig,
    error::{OrbitError, Result},
    events::{EventBus, OrbitEvent},
    gravity::GravityMode,
    kepler::{
        orbits::{circular_speed, SHAPE_TOLERANCE},
        propagator::coast,
        Orbit,
    },
    maneuver::Maneuver,
    persistence::OrbitalState,
    soi::SoiResolver,
    spatial::Octree,
    time::UT,
    transfer::{HohmannTransfer, TransferPlanner, TransferWindow},
};

/// Result of [`OrbitalMechanics::initialize_circular_orbit`].
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircularOrbit {
    /// Orbit radius (km)
    pub radius: f64,
    /// Orbit speed (km/s)
    pub speed: f64,
    /// Orbital period (s)
    pub period: f64,
}

/// Owner of every [`OrbitalBody`] in a universe.
///
/// All mutation goes through `&mut self` on the thread driving
/// [`OrbitalMechanics::tick`]; other threads use [`CommandQueue`] and
/// [`SnapshotHandle`].
#[derive(Debug)]
pub struct OrbitalMechanics {
    bodies: Registry,
    config: SimConfig,
    index: Octree,
    events: EventBus,
    epoch: UT,
    /// Pairs in contact at the end of the last step, lower ID first.
    contacts: BTreeSet<(BodyId, BodyId)>,
    commands: CommandQueue,
    snapshot: Option<SnapshotHandle>,
}

impl Default for OrbitalMechanics {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

/// World-space state of a point fixed to `target`'s surface frame.
fn surface_state(target: &OrbitalBody, offset: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let r = target.body_to_world() * offset;
    (
        target.position + r,
        target.velocity + target.angular_velocity().cross(&r),
    )
}

fn require_finite(name: &str, v: &Vector3<f64>) -> Result<()> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(OrbitError::InvalidBody {
            name: name.into(),
            reason: "vector must be finite".into(),
        })
    }
}

impl OrbitalMechanics {
    pub fn new(mut config: SimConfig) -> Self {
        for field in config.sanitize() {
            warn!(field, "invalid simulation setting replaced with its default");
        }
        Self {
            bodies: Registry::new(),
            index: Octree::new(config.octree),
            config,
            events: EventBus::new(),
            epoch: UT::ZERO,
            contacts: BTreeSet::new(),
            commands: CommandQueue::new(),
            snapshot: None,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn set_gravity_mode(&mut self, mode: GravityMode) {
        info!(?mode, "gravity mode changed");
        self.config.gravity_mode = mode;
    }

    pub fn set_max_time_step(&mut self, max_time_step: f64) {
        if max_time_step.is_finite() && max_time_step > 0.0 {
            self.config.max_time_step = max_time_step;
        } else {
            warn!(max_time_step, "ignoring non-positive max time step");
        }
    }

    /// Current simulation time.
    pub fn epoch(&self) -> UT {
        self.epoch
    }

    fn body(&self, id: BodyId) -> Result<&OrbitalBody> {
        self.bodies.get(id).ok_or(OrbitError::UnknownBody(id))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut OrbitalBody> {
        self.bodies.get_mut(id).ok_or(OrbitError::UnknownBody(id))
    }

    fn target_of(&self, id: BodyId) -> Result<(BodyId, &OrbitalBody)> {
        let target = self
            .body(id)?
            .orbit_target
            .ok_or_else(|| OrbitError::InvalidState(format!("body {id} has no orbit target")))?;
        Ok((target, self.body(target)?))
    }

    // ------------------------------------------------------------------
    // Registration

    /// Add `body` to the registry and return its new ID.
    ///
    /// Bodies built with [`OrbitalBody::with_elements`] get their position
    /// and velocity from the elements; landed bodies from their target's
    /// surface frame.
    pub fn register_body(&mut self, mut body: OrbitalBody) -> Result<BodyId> {
        if let Some(id) = body.id.filter(|&id| self.bodies.contains(id)) {
            warn!(%id, name = %body.name, "body is already registered");
            return Err(OrbitError::AlreadyRegistered(id));
        }
        body.validate()?;
        let derived = match body.orbit_target {
            Some(target) => {
                let primary = self.body(target)?;
                match (body.mode, body.elements, body.landed) {
                    (OrbitMode::Orbit, Some(orbit), _) => orbit.validate(primary.mu()).map(|()| {
                        let (rv, vv) = orbit.state_vector(primary.mu());
                        Some((primary.position + rv, primary.velocity + vv))
                    }),
                    (OrbitMode::Landed, _, Some(landed)) => Ok(Some(surface_state(primary, &landed.offset))),
                    _ => Ok(None),
                }
            }
            None => Ok(None),
        };
        let id = self.bodies.reserve_id();
        let derived = derived.map_err(|reason| OrbitError::DegenerateOrbit {
            body: id,
            reason: reason.into(),
        })?;
        if let Some((position, velocity)) = derived {
            body.position = position;
            body.velocity = velocity;
        }
        if !body.has_finite_state() {
            return Err(OrbitError::InvalidBody {
                name: body.name,
                reason: "derived state is not finite".into(),
            });
        }

        body.id = Some(id);
        body.settle = None;
        info!(%id, name = %body.name, kind = ?body.kind, mode = ?body.mode, "registered body");
        self.index.insert(id, body.position);
        self.bodies.insert(id, body);
        Ok(id)
    }

    /// Remove a body. Bodies that still have satellites (including landed
    /// ones) cannot be removed until those are re-targeted or removed.
    pub fn unregister_body(&mut self, id: BodyId) -> Result<OrbitalBody> {
        if !self.bodies.contains(id) {
            warn!(%id, "cannot unregister unknown body");
            return Err(OrbitError::UnknownBody(id));
        }
        if let Some((satellite, _)) = self.bodies.iter().find(|(_, b)| b.orbit_target == Some(id)) {
            return Err(OrbitError::InvalidState(format!(
                "body {id} still has satellite {satellite}"
            )));
        }
        let mut body = self.bodies.remove(id).ok_or(OrbitError::UnknownBody(id))?;
        self.index.remove(id);
        self.contacts.retain(|&(a, b)| a != id && b != id);
        body.id = None;
        info!(%id, name = %body.name, "unregistered body");
        Ok(body)
    }

    /// Queue for registry changes from other threads, applied at the start
    /// of the next tick.
    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    // ------------------------------------------------------------------
    // Queries

    pub fn get_body(&self, id: BodyId) -> Option<&OrbitalBody> {
        let body = self.bodies.get(id);
        if body.is_none() {
            debug!(%id, "query for unregistered body");
        }
        body
    }

    pub fn get_all_bodies(&self) -> impl Iterator<Item = (BodyId, &OrbitalBody)> {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// IDs of bodies within `radius` km of `position`, boundary inclusive.
    pub fn find_bodies_in_radius(&self, position: &Vector3<f64>, radius: f64) -> Vec<BodyId> {
        self.index.query(position, radius)
    }

    /// The body closest to `position`, other than `exclude`.
    pub fn nearest_body(&self, position: &Vector3<f64>, exclude: Option<BodyId>) -> Option<(BodyId, f64)> {
        self.index.nearest(position, |id| Some(id) != exclude)
    }

    fn resolver(&self) -> SoiResolver<'_> {
        SoiResolver::new(
            &self.bodies,
            &self.index,
            self.config.min_source_mass,
            self.config.soi.hysteresis,
        )
    }

    pub fn get_dominant_body(&self, position: &Vector3<f64>) -> Option<BodyId> {
        self.resolver().dominant_body(position)
    }

    pub fn is_in_sphere_of_influence(&self, position: &Vector3<f64>, id: BodyId) -> bool {
        self.resolver().is_in_soi(position, id)
    }

    pub fn soi_radius(&self, id: BodyId) -> Option<f64> {
        self.resolver().soi_radius(id)
    }

    /// A read-only copy of the universe for other threads, refreshed at
    /// every tick boundary from now on.
    pub fn snapshot_handle(&mut self) -> SnapshotHandle {
        if let Some(handle) = &self.snapshot {
            return handle.clone();
        }
        let handle = SnapshotHandle::default();
        self.snapshot = Some(handle.clone());
        self.publish_snapshot();
        handle
    }

    // ------------------------------------------------------------------
    // Orbit control

    /// Put a body on a circular orbit at its current distance from its
    /// target, keeping the orbital plane of its current motion.
    pub fn initialize_circular_orbit(&mut self, id: BodyId) -> Result<CircularOrbit> {
        let mode = self.body(id)?.mode.set_orbit(id)?;
        let (_, target) = self.target_of(id)?;
        let body = self.body(id)?;
        let degenerate = |reason: &str| OrbitError::DegenerateOrbit {
            body: id,
            reason: reason.into(),
        };

        let rel = body.position - target.position;
        let relv = body.velocity - target.velocity;
        let radius = rel.norm();
        let mu = target.mu();
        if !(radius.is_finite() && radius > 0.0) {
            return Err(degenerate("body sits at its target's center"));
        }
        if mu <= 0.0 {
            return Err(degenerate("target has no mass"));
        }
        let r_hat = rel / radius;
        let normal = rel.cross(&relv).try_normalize(f64::EPSILON).unwrap_or_else(|| {
            let reference = if r_hat.z.abs() < 0.9 { Vector3::z() } else { Vector3::x() };
            (reference - r_hat * reference.dot(&r_hat)).normalize()
        });
        let speed = circular_speed(radius, mu);
        let velocity = normal.cross(&r_hat) * speed;
        let orbit = Orbit::from_state(rel, velocity, mu, SHAPE_TOLERANCE).map_err(degenerate)?;
        let target_velocity = target.velocity;

        let body = self.body_mut(id)?;
        body.velocity = target_velocity + velocity;
        body.elements = Some(orbit);
        body.mode = mode;
        body.thrust = Vector3::zeros();
        body.settle = None;
        info!(%id, radius, speed, period = orbit.period, "initialized circular orbit");
        Ok(CircularOrbit {
            radius,
            speed,
            period: orbit.period,
        })
    }

    /// Place a body on `orbit` around `target`. Nothing changes if the
    /// elements are degenerate or the new target would create a cycle.
    pub fn set_orbital_elements(&mut self, id: BodyId, target: BodyId, orbit: Orbit) -> Result<()> {
        let mode = self.body(id)?.mode.set_orbit(id)?;
        let primary = self.body(target)?;
        if target == id || is_ancestor(&self.bodies, id, target) {
            return Err(OrbitError::OrbitCycle { body: id, target });
        }
        let degenerate = |reason: &str| OrbitError::DegenerateOrbit {
            body: id,
            reason: reason.into(),
        };
        orbit.validate(primary.mu()).map_err(degenerate)?;
        let (rv, vv) = orbit.state_vector(primary.mu());
        let (position, velocity) = (primary.position + rv, primary.velocity + vv);
        if !position.iter().chain(velocity.iter()).all(|x| x.is_finite()) {
            return Err(degenerate("elements produce a non-finite state"));
        }

        let body = self.body_mut(id)?;
        body.position = position;
        body.velocity = velocity;
        body.orbit_target = Some(target);
        body.elements = Some(orbit);
        body.mode = mode;
        body.thrust = Vector3::zeros();
        body.settle = None;
        self.index.update(id, position);
        debug!(%id, %target, a = orbit.a, e = orbit.e, "set orbital elements");
        Ok(())
    }

    // ------------------------------------------------------------------
    // State changes

    /// Add `deltav` (km/s, world axes) to a body's velocity. Bodies on
    /// rails drop to ballistic flight.
    pub fn apply_impulse(&mut self, id: BodyId, deltav: Vector3<f64>) -> Result<()> {
        let body = self.body(id)?;
        require_finite(&body.name, &deltav)?;
        let mode = body.mode.apply_impulse(id)?;
        let body = self.body_mut(id)?;
        body.velocity += deltav;
        body.mode = mode;
        body.elements = None;
        body.settle = None;
        debug!(%id, dv = deltav.norm(), ?mode, "applied impulse");
        Ok(())
    }

    /// Execute a Frenet-frame burn, returning the delta-v in world axes.
    pub fn execute_maneuver(&mut self, id: BodyId, maneuver: &Maneuver) -> Result<Vector3<f64>> {
        let (_, target) = self.target_of(id)?;
        let body = self.body(id)?;
        let deltav = maneuver
            .deltav_world(&(body.position - target.position), &(body.velocity - target.velocity))
            .ok_or_else(|| OrbitError::DegenerateOrbit {
                body: id,
                reason: "no frenet frame for a radial or stationary trajectory".into(),
            })?;
        self.apply_impulse(id, deltav)?;
        Ok(deltav)
    }

    /// Set a body down on the surface of its orbit target, directly below
    /// its current position.
    pub fn land(&mut self, id: BodyId) -> Result<()> {
        let mode = self.body(id)?.mode.land(id)?;
        let (target_id, target) = self.target_of(id)?;
        let body = self.body(id)?;
        let rel = body.position - target.position;
        let up = rel.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::z);
        let world_offset = up * (target.radius + body.radius);
        let offset = target.body_to_world().inverse_transform_vector(&world_offset);
        let (position, velocity) = surface_state(target, &offset);

        let body = self.body_mut(id)?;
        body.mode = mode;
        body.landed = Some(LandedTransform { offset });
        body.position = position;
        body.velocity = velocity;
        body.elements = None;
        body.thrust = Vector3::zeros();
        body.settle = None;
        self.index.update(id, position);
        info!(%id, target = %target_id, "landed");
        self.events.emit(OrbitEvent::Landed {
            body: id,
            target: target_id,
        });
        Ok(())
    }

    /// Leave the surface with `initial_velocity` (km/s) relative to the
    /// launch site.
    pub fn take_off(&mut self, id: BodyId, initial_velocity: Vector3<f64>) -> Result<()> {
        let body = self.body(id)?;
        require_finite(&body.name, &initial_velocity)?;
        let mode = body.mode.take_off(id)?;
        let body = self.body_mut(id)?;
        body.mode = mode;
        body.landed = None;
        body.velocity += initial_velocity;
        body.settle = None;
        info!(%id, speed = initial_velocity.norm(), "took off");
        self.events.emit(OrbitEvent::TakenOff { body: id });
        Ok(())
    }

    /// Start a constant commanded acceleration (km/s², world axes).
    pub fn begin_thrust(&mut self, id: BodyId, acceleration: Vector3<f64>) -> Result<()> {
        let body = self.body(id)?;
        require_finite(&body.name, &acceleration)?;
        let mode = body.mode.begin_thrust(id)?;
        let body = self.body_mut(id)?;
        body.mode = mode;
        body.thrust = acceleration;
        body.elements = None;
        body.settle = None;
        debug!(%id, accel = acceleration.norm(), "thrust started");
        Ok(())
    }

    pub fn end_thrust(&mut self, id: BodyId) -> Result<()> {
        let mode = self.body(id)?.mode.end_thrust(id)?;
        let body = self.body_mut(id)?;
        body.mode = mode;
        body.thrust = Vector3::zeros();
        debug!(%id, "thrust ended");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prediction

    /// World-space position and velocity of `id` after `delta_t` seconds,
    /// following each body's own propagation rule and ignoring thrust and
    /// SOI changes.
    pub fn predict_state(&self, id: BodyId, delta_t: f64) -> Result<(Vector3<f64>, Vector3<f64>)> {
        let body = self.body(id)?;
        let Some(target_id) = body.orbit_target else {
            return Ok((body.position + body.velocity * delta_t, body.velocity));
        };
        let target = self.body(target_id)?;
        let (tp, tv) = self.predict_state(target_id, delta_t)?;
        let rel = body.position - target.position;
        let relv = body.velocity - target.velocity;

        let (rp, rv) = match (body.mode, body.elements.as_ref(), body.landed.as_ref()) {
            (OrbitMode::Orbit, Some(orbit), _) => {
                let p = self.config.propagator().propagate(orbit, target.mu(), delta_t);
                (p.position, p.velocity)
            }
            (OrbitMode::Landed, _, Some(landed)) => {
                let w = target.angular_velocity();
                let spin = Unit::try_new(w, f64::EPSILON).map_or_else(Rotation3::identity, |axis| {
                    Rotation3::from_axis_angle(&axis, w.norm() * delta_t)
                });
                let r = spin * (target.body_to_world() * landed.offset);
                (r, w.cross(&r))
            }
            _ => coast(
                rel,
                relv,
                target.mu(),
                delta_t,
                self.config.kepler.tolerance,
                self.config.kepler.max_iter,
            )
            .unwrap_or((rel + relv * delta_t, relv)),
        };
        Ok((tp + rp, tv + rv))
    }

    /// Whether `a` and `b` will overlap `delta_t` seconds from now.
    ///
    /// Bodies overlap when their separation is strictly less than the sum
    /// of their radii; touching surfaces do not count.
    pub fn will_collide(&self, a: BodyId, b: BodyId, delta_t: f64) -> Result<bool> {
        let (ra, rb) = (self.body(a)?.radius, self.body(b)?.radius);
        if a == b {
            return Ok(false);
        }
        let (pa, _) = self.predict_state(a, delta_t)?;
        let (pb, _) = self.predict_state(b, delta_t)?;
        Ok((pa - pb).norm() < ra + rb)
    }

    // ------------------------------------------------------------------
    // Planning

    fn planner(&self) -> TransferPlanner<'_> {
        TransferPlanner::new(&self.bodies, self.config.propagator(), self.config.window)
    }

    pub fn calculate_hohmann_transfer(&self, from: BodyId, to: BodyId) -> Result<HohmannTransfer> {
        self.planner().calculate_hohmann_transfer(from, to)
    }

    pub fn calculate_transfer_window(&self, from: BodyId, to: BodyId) -> Result<TransferWindow> {
        self.planner().calculate_transfer_window(from, to, self.epoch)
    }

    // ------------------------------------------------------------------
    // Events

    /// Register a callback for every event fired from now on.
    pub fn subscribe(&mut self, listener: impl FnMut(&OrbitEvent) + Send + 'static) {
        self.events.subscribe(listener);
    }

    /// Take every event fired since the last call.
    pub fn drain_events(&mut self) -> Vec<OrbitEvent> {
        self.events.drain()
    }

    // ------------------------------------------------------------------
    // Persistence

    pub fn save_orbital_state(&self) -> OrbitalState {
        OrbitalState::capture(self.epoch, &self.bodies)
    }

    /// Replace the whole universe with a saved one. On error the current
    /// universe is left untouched.
    pub fn load_orbital_state(&mut self, state: OrbitalState) -> Result<()> {
        let (epoch, bodies) = state.into_registry()?;
        self.epoch = epoch;
        self.bodies = bodies;
        self.contacts.clear();
        self.index
            .rebuild(self.bodies.iter().map(|(id, b)| (id, b.position)).collect());
        info!(bodies = self.bodies.len(), %epoch, "loaded orbital state");
        self.publish_snapshot();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{bodies::BodyKind, gravity::G, kepler::orbits::period_of};

    const MU: f64 = 398_600.0;

    fn earth_mass() -> f64 {
        MU / (G * 1e-9)
    }

    fn earth_system() -> (OrbitalMechanics, BodyId) {
        let mut sim = OrbitalMechanics::default();
        let earth = sim
            .register_body(OrbitalBody::new("Earth", BodyKind::Planet, earth_mass(), 6371.0).with_rotation(24.0, 0.0))
            .unwrap();
        (sim, earth)
    }

    fn ship_at(sim: &mut OrbitalMechanics, earth: BodyId, r: f64) -> BodyId {
        let orbit = Orbit::circular(MU, r, 0.0).unwrap();
        sim.register_body(OrbitalBody::new("Ship", BodyKind::Spacecraft, 1.0e4, 0.01).with_elements(earth, orbit))
            .unwrap()
    }

    #[test]
    fn registration_derives_state_from_elements() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.id(), Some(ship));
        assert_relative_eq!(body.position.norm(), 7000.0, max_relative = 1e-12);
        assert_relative_eq!(body.velocity.norm(), circular_speed(7000.0, MU), max_relative = 1e-9);
        assert_eq!(sim.find_bodies_in_radius(&Vector3::zeros(), 7000.5), vec![earth, ship]);
    }

    #[test]
    fn registry_misuse_is_recoverable() {
        let (mut sim, earth) = earth_system();
        let again = sim.get_body(earth).unwrap().clone();
        assert_eq!(sim.register_body(again), Err(OrbitError::AlreadyRegistered(earth)));

        let stray = BodyId::default();
        assert!(sim.get_body(stray).is_none());
        assert_eq!(sim.unregister_body(stray).unwrap_err(), OrbitError::UnknownBody(stray));

        let orphan = OrbitalBody::new("Lost", BodyKind::Spacecraft, 1.0, 1.0).orbiting(stray);
        assert_eq!(sim.register_body(orphan), Err(OrbitError::UnknownBody(stray)));

        let bad = OrbitalBody::new("Flat", BodyKind::Moon, -5.0, 10.0);
        assert!(matches!(sim.register_body(bad), Err(OrbitError::InvalidBody { .. })));
        assert_eq!(sim.body_count(), 1);
    }

    #[test]
    fn bodies_with_satellites_stay_registered() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        assert!(matches!(sim.unregister_body(earth), Err(OrbitError::InvalidState(_))));
        let removed = sim.unregister_body(ship).unwrap();
        assert_eq!(removed.id(), None);
        assert!(sim.find_bodies_in_radius(&Vector3::zeros(), 1.0e4).iter().all(|&id| id != ship));
        sim.unregister_body(earth).unwrap();
        assert_eq!(sim.body_count(), 0);
    }

    #[test]
    fn circular_orbit_from_current_position() {
        let (mut sim, earth) = earth_system();
        let probe = sim
            .register_body(
                OrbitalBody::new("Probe", BodyKind::Spacecraft, 100.0, 0.001)
                    .orbiting(earth)
                    .with_position(Vector3::new(1000.0, 0.0, 0.0))
                    .with_velocity(Vector3::new(0.0, 3.0, 0.0)),
            )
            .unwrap();
        let circular = sim.initialize_circular_orbit(probe).unwrap();
        assert_relative_eq!(circular.speed, libm::sqrt(MU / 1000.0), max_relative = 1e-9);
        assert_relative_eq!(circular.period, period_of(1000.0, MU), max_relative = 1e-9);

        let body = sim.get_body(probe).unwrap();
        assert_eq!(body.mode(), OrbitMode::Orbit);
        assert_relative_eq!(body.velocity, Vector3::new(0.0, circular.speed, 0.0), epsilon = 1e-9);
        assert_relative_eq!(body.elements().unwrap().e, 0.0);
    }

    #[test]
    fn degenerate_elements_leave_body_alone() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        let before = sim.get_body(ship).unwrap().clone();

        let mut hyperbolic = Orbit::circular(MU, 9000.0, 0.0).unwrap();
        hyperbolic.e = 1.5;
        assert!(matches!(
            sim.set_orbital_elements(ship, earth, hyperbolic),
            Err(OrbitError::DegenerateOrbit { .. })
        ));
        assert_eq!(sim.set_orbital_elements(earth, ship, Orbit::circular(1.0, 10.0, 0.0).unwrap()).unwrap_err(),
            OrbitError::InvalidTransition { body: earth, mode: OrbitMode::Root, operation: "enter an orbit" });
        assert_eq!(sim.get_body(ship).unwrap(), &before);
    }

    #[test]
    fn retargeting_onto_own_satellite_is_a_cycle() {
        let (mut sim, earth) = earth_system();
        let moon_orbit = Orbit::circular(MU, 384_400.0, 0.0).unwrap();
        let moon = sim
            .register_body(OrbitalBody::new("Moon", BodyKind::Moon, 7.342e22, 1737.0).with_elements(earth, moon_orbit))
            .unwrap();
        let ship = {
            let mu = sim.get_body(moon).unwrap().mu();
            let orbit = Orbit::circular(mu, 2000.0, 0.0).unwrap();
            sim.register_body(OrbitalBody::new("Lander", BodyKind::Spacecraft, 1.0e4, 0.01).with_elements(moon, orbit))
                .unwrap()
        };
        let orbit = Orbit::circular(1.0e3, 100.0, 0.0).unwrap();
        assert_eq!(
            sim.set_orbital_elements(moon, ship, orbit),
            Err(OrbitError::OrbitCycle { body: moon, target: ship })
        );
        assert_eq!(
            sim.set_orbital_elements(moon, moon, orbit),
            Err(OrbitError::OrbitCycle { body: moon, target: moon })
        );
    }

    #[test]
    fn impulse_and_maneuver_drop_to_ballistic() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        let dv = sim.execute_maneuver(ship, &Maneuver::prograde(0.5)).unwrap();
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Ballistic);
        assert!(body.elements().is_none());
        assert_relative_eq!(dv, Vector3::new(0.0, 0.5, 0.0), epsilon = 1e-12);
        assert_relative_eq!(body.velocity.y, circular_speed(7000.0, MU) + 0.5, max_relative = 1e-12);

        assert!(sim.apply_impulse(earth, Vector3::x()).is_err());
        assert!(sim.apply_impulse(ship, Vector3::new(f64::NAN, 0.0, 0.0)).is_err());
    }

    #[test]
    fn landing_and_take_off_fire_events() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        sim.land(ship).unwrap();
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Landed);
        assert_relative_eq!(body.position.norm(), 6371.01, max_relative = 1e-12);
        let spin = sim.get_body(earth).unwrap().angular_velocity();
        assert_relative_eq!(body.velocity, spin.cross(&body.position), epsilon = 1e-12);
        assert!(sim.land(ship).is_err());

        sim.take_off(ship, Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(sim.get_body(ship).unwrap().mode(), OrbitMode::Ballistic);
        assert_eq!(
            sim.drain_events(),
            vec![
                OrbitEvent::Landed { body: ship, target: earth },
                OrbitEvent::TakenOff { body: ship },
            ]
        );
        assert!(sim.take_off(ship, Vector3::zeros()).is_err());
    }

    #[test]
    fn thrust_requires_free_flight() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        assert!(sim.end_thrust(ship).is_err());
        sim.begin_thrust(ship, Vector3::new(0.0, 1.0e-3, 0.0)).unwrap();
        assert_eq!(sim.get_body(ship).unwrap().mode(), OrbitMode::Thrust);
        sim.end_thrust(ship).unwrap();
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Ballistic);
        assert_eq!(body.thrust(), Vector3::zeros());
    }

    #[test]
    fn will_collide_uses_strict_overlap() {
        let mut sim = OrbitalMechanics::default();
        let a = sim
            .register_body(
                OrbitalBody::new("A", BodyKind::Asteroid, 1.0, 1.0)
                    .with_gravity(false)
                    .with_velocity(Vector3::new(1.0, 0.0, 0.0)),
            )
            .unwrap();
        let b = sim
            .register_body(
                OrbitalBody::new("B", BodyKind::Asteroid, 1.0, 1.0)
                    .with_gravity(false)
                    .with_position(Vector3::new(12.0, 0.0, 0.0)),
            )
            .unwrap();
        // After 10 s, A sits at x = 10: exactly touching B.
        assert!(!sim.will_collide(a, b, 10.0).unwrap());
        assert!(sim.will_collide(a, b, 10.5).unwrap());
        assert!(!sim.will_collide(a, b, 1.0).unwrap());
        assert!(!sim.will_collide(a, a, 1.0).unwrap());
        assert!(sim.will_collide(a, BodyId::default(), 1.0).is_err());
    }

    #[test]
    fn prediction_follows_rails() {
        let (mut sim, earth) = earth_system();
        let ship = ship_at(&mut sim, earth, 7000.0);
        let period = period_of(7000.0, MU);
        let (p, _) = sim.predict_state(ship, period / 2.0).unwrap();
        assert_relative_eq!(p, Vector3::new(-7000.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn hohmann_through_manager() {
        let (mut sim, earth) = earth_system();
        let leo = ship_at(&mut sim, earth, 7000.0);
        let geo = ship_at(&mut sim, earth, 42_000.0);
        let t = sim.calculate_hohmann_transfer(leo, geo).unwrap();
        assert_relative_eq!(t.transfer_time / 3600.0, 5.30, max_relative = 0.01);
        let window = sim.calculate_transfer_window(leo, geo).unwrap();
        assert!(window.wait >= 0.0);
        assert!(window.departure >= sim.epoch());
    }
}
