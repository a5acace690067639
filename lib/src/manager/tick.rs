//! The per-tick pipeline: propagate, resolve SOI transitions, update the
//! spatial index, check collisions, fire events.

use std::collections::BTreeSet;

use itertools::Itertools;
use nalgebra::Vector3;
use tracing::{debug, info, trace, warn};

use super::{
    surface_state,
    sync::{Command, Snapshot},
    OrbitalMechanics,
};
use crate::{
    bodies::{is_ancestor, orbit_depth, BodyId, OrbitMode, OrbitalBody, SettleTracker},
    events::OrbitEvent,
    gravity::{GravityMode, GravityModel},
    kepler::{
        orbits::{wrap_two_pi, SHAPE_TOLERANCE},
        KeplerPropagator, Orbit,
    },
};

/// What happened during one call to [`OrbitalMechanics::tick`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Propagation steps the tick was divided into.
    pub substeps: u32,
    /// Length of each step (s), before per-body warp.
    pub step: f64,
    /// Queued commands applied before propagating.
    pub commands: usize,
    /// Body updates rejected for producing a non-finite state.
    pub failures: usize,
    pub transitions: usize,
    pub collisions: usize,
}

/// Where a body ends up after one step.
#[derive(Copy, Clone, Debug)]
enum Motion {
    /// Relative to the orbit target's post-step state.
    Relative(Vector3<f64>, Vector3<f64>),
    World(Vector3<f64>, Vector3<f64>),
    /// Fixed to the target's surface.
    Surface,
}

#[derive(Copy, Clone, Debug)]
struct Update {
    motion: Motion,
    rotation_angle: f64,
    mode: OrbitMode,
    elements: Option<Orbit>,
    settle: Option<SettleTracker>,
}

fn is_finite(v: &Vector3<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

impl OrbitalMechanics {
    /// Advance the simulation by `delta_time` seconds (scaled by the global
    /// time warp), subdividing so no propagation call exceeds
    /// `max_time_step`.
    #[allow(clippy::cast_sign_loss)]
    pub fn tick(&mut self, delta_time: f64) -> TickReport {
        let mut report = TickReport {
            commands: self.flush_commands(),
            ..TickReport::default()
        };
        if !(delta_time.is_finite() && delta_time > 0.0) {
            if delta_time != 0.0 {
                warn!(delta_time, "ignoring invalid tick length");
            }
            self.publish_snapshot();
            return report;
        }

        let total = delta_time * self.config.time_warp;
        let Some(epoch) = self.epoch.checked_advanced(total) else {
            warn!(delta_time, epoch = %self.epoch, "tick would overflow the epoch; ignoring it");
            self.publish_snapshot();
            return report;
        };
        let max_warp = self
            .bodies
            .values()
            .map(|b| b.time_warp_factor)
            .fold(1.0, f64::max);
        let needed = (total * max_warp / self.config.max_time_step).ceil();
        let substeps = if needed.is_finite() {
            (needed as u32).clamp(1, self.config.max_substeps)
        } else {
            self.config.max_substeps
        };
        if f64::from(substeps) < needed {
            warn!(
                needed,
                max = self.config.max_substeps,
                "tick needs more substeps than allowed; lengthening steps"
            );
        }
        let step = total / f64::from(substeps);
        report.substeps = substeps;
        report.step = step;

        for _ in 0..substeps {
            self.step(step, &mut report);
        }
        self.epoch = epoch;
        debug!(epoch = %self.epoch, ?report, "tick complete");
        self.publish_snapshot();
        report
    }

    fn flush_commands(&mut self) -> usize {
        let commands = self.commands.take();
        let count = commands.len();
        for command in commands {
            match command {
                Command::Register(body) => {
                    let name = body.name.clone();
                    if let Err(err) = self.register_body(*body) {
                        warn!(%err, %name, "queued registration failed");
                    }
                }
                Command::Unregister(id) => {
                    if let Err(err) = self.unregister_body(id) {
                        warn!(%err, %id, "queued unregistration failed");
                    }
                }
            }
        }
        count
    }

    fn step(&mut self, dt: f64, report: &mut TickReport) {
        let mut events = vec![];
        let padding = self.propagate(dt, &mut events, report);
        if matches!(
            self.config.gravity_mode,
            GravityMode::PatchedConics | GravityMode::NBody
        ) {
            self.resolve_soi_transitions(padding, &mut events, report);
        }
        for (id, body) in self.bodies.iter() {
            self.index.update(id, body.position);
        }
        if self.config.collisions {
            self.detect_collisions(&mut events, report);
        }
        for event in events {
            self.events.emit(event);
        }
    }

    /// Move every body one step, computing all updates from the state at
    /// the start of the step before applying any. Returns the largest
    /// displacement.
    fn propagate(&mut self, dt: f64, events: &mut Vec<OrbitEvent>, report: &mut TickReport) -> f64 {
        let gravity = self.config.gravity_model();
        let propagator = self.config.propagator();
        let sources = if self.config.gravity_mode == GravityMode::NBody {
            gravity.sources(&self.bodies)
        } else {
            vec![]
        };

        let updates = self
            .bodies
            .iter()
            .filter_map(|(id, body)| {
                let update = self.compute_update(body, dt * body.time_warp_factor, &gravity, &propagator, &sources);
                if update.is_none() {
                    warn!(%id, name = %body.name, mode = ?body.mode, "propagation failed; keeping last valid state");
                    report.failures += 1;
                }
                update.map(|u| (id, u))
            })
            .collect_vec();

        // Parents first, so relative motion is applied on top of each
        // target's post-step state.
        let order = updates
            .into_iter()
            .sorted_by_key(|(id, _)| (orbit_depth(&self.bodies, *id).unwrap_or(0), *id))
            .collect_vec();

        let mut max_displacement: f64 = 0.0;
        for (id, update) in order {
            let target = self
                .bodies
                .get(id)
                .and_then(|b| b.orbit_target)
                .and_then(|t| self.bodies.get(t));
            let state = match (update.motion, target) {
                (Motion::World(p, v), _) => Some((p, v)),
                (Motion::Relative(rp, rv), Some(t)) => Some((t.position + rp, t.velocity + rv)),
                (Motion::Surface, Some(t)) => self
                    .bodies
                    .get(id)
                    .and_then(|b| b.landed)
                    .map(|landed| surface_state(t, &landed.offset)),
                _ => None,
            };
            let Some((position, velocity)) = state.filter(|(p, v)| is_finite(p) && is_finite(v)) else {
                warn!(%id, "propagated state is not finite; keeping last valid state");
                report.failures += 1;
                continue;
            };
            let Some(body) = self.bodies.get_mut(id) else {
                continue;
            };
            max_displacement = max_displacement.max((position - body.position).norm());
            if body.mode == OrbitMode::Ballistic && update.mode == OrbitMode::Orbit {
                info!(%id, name = %body.name, "orbit established");
                events.push(OrbitEvent::OrbitEstablished { body: id });
            }
            body.position = position;
            body.velocity = velocity;
            body.rotation_angle = update.rotation_angle;
            body.mode = update.mode;
            body.elements = update.elements;
            body.settle = update.settle;
        }
        max_displacement
    }

    /// One body's motion over `dt`, or `None` if it cannot be advanced.
    fn compute_update(
        &self,
        body: &OrbitalBody,
        dt: f64,
        gravity: &GravityModel,
        propagator: &KeplerPropagator,
        sources: &[BodyId],
    ) -> Option<Update> {
        let rotation_angle = wrap_two_pi(body.rotation_angle + body.angular_velocity().norm() * dt);
        let mut update = Update {
            motion: Motion::Surface,
            rotation_angle,
            mode: body.mode,
            elements: None,
            settle: None,
        };
        let nbody = self.config.gravity_mode == GravityMode::NBody;
        let target = body.orbit_target.and_then(|t| self.bodies.get(t));

        match body.mode {
            OrbitMode::Root if nbody => {
                let a = gravity.nbody_acceleration(body, body.position, &self.bodies, sources);
                let v = body.velocity + a * dt;
                update.motion = Motion::World(body.position + v * dt, v);
            }
            OrbitMode::Root => {
                update.motion = Motion::World(body.position + body.velocity * dt, body.velocity);
            }
            OrbitMode::Orbit => {
                let orbit = body.elements.as_ref()?;
                let p = propagator.propagate(orbit, target?.mu(), dt);
                if !p.is_finite() {
                    return None;
                }
                trace!(name = %body.name, ta = p.orbit.ta, "on rails");
                update.motion = Motion::Relative(p.position, p.velocity);
                update.elements = Some(p.orbit);
            }
            OrbitMode::Landed => {
                target?;
            }
            OrbitMode::Ballistic | OrbitMode::Thrust if nbody => {
                let a = gravity.nbody_acceleration(body, body.position, &self.bodies, sources) + body.thrust;
                let v = body.velocity + a * dt;
                update.motion = Motion::World(body.position + v * dt, v);
            }
            OrbitMode::Ballistic | OrbitMode::Thrust => {
                let target = target?;
                let a = gravity.primary_acceleration(body, body.position, &self.bodies) + body.thrust;
                let relv = body.velocity - target.velocity + a * dt;
                let rel = body.position - target.position + relv * dt;
                if !(is_finite(&rel) && is_finite(&relv)) {
                    return None;
                }
                update.motion = Motion::Relative(rel, relv);
                if body.mode == OrbitMode::Ballistic && self.config.settle.enabled {
                    self.track_settling(body, target, rel, relv, &mut update);
                }
            }
        }
        Some(update)
    }

    /// Count consecutive steps over which a ballistic body's osculating
    /// elements agree; enough of them put it back on rails.
    fn track_settling(
        &self,
        body: &OrbitalBody,
        target: &OrbitalBody,
        rel: Vector3<f64>,
        relv: Vector3<f64>,
        update: &mut Update,
    ) {
        let settings = self.config.settle;
        let Ok(orbit) = Orbit::from_state(rel, relv, target.mu(), SHAPE_TOLERANCE) else {
            return;
        };
        // Trajectories that intersect the target never settle.
        if orbit.periapsis_radius() <= target.radius + body.radius {
            return;
        }
        let ticks = match body.settle {
            Some(prev)
                if (orbit.a - prev.a).abs() <= settings.tolerance * prev.a
                    && (orbit.e - prev.e).abs() <= settings.tolerance =>
            {
                prev.ticks + 1
            }
            _ => 1,
        };
        if ticks >= settings.ticks {
            if let Ok(mode) = body.mode.establish_orbit(body.id.unwrap_or_default()) {
                update.mode = mode;
                update.elements = Some(orbit);
                return;
            }
        }
        update.settle = Some(SettleTracker {
            a: orbit.a,
            e: orbit.e,
            ticks,
        });
    }

    fn resolve_soi_transitions(&mut self, padding: f64, events: &mut Vec<OrbitEvent>, report: &mut TickReport) {
        let transitions = {
            let resolver = self.resolver().with_padding(padding);
            self.bodies
                .ids()
                .filter_map(|id| resolver.resolve_transition(id).map(|to| (id, to)))
                .collect_vec()
        };
        for (id, to) in transitions {
            if let Some(from) = self.rebase(id, to) {
                report.transitions += 1;
                events.push(OrbitEvent::SoiTransition { body: id, from, to });
            }
        }
    }

    /// Re-target `id` onto `to`, recomputing its elements from the current
    /// relative state. Position and velocity are untouched.
    fn rebase(&mut self, id: BodyId, to: BodyId) -> Option<BodyId> {
        if is_ancestor(&self.bodies, id, to) {
            debug!(%id, %to, "skipping SOI transition onto own satellite");
            return None;
        }
        let target = self.bodies.get(to)?;
        let (target_position, target_velocity, mu) = (target.position, target.velocity, target.mu());
        let body = self.bodies.get_mut(id)?;
        let from = body.orbit_target?;
        let rel = body.position - target_position;
        let relv = body.velocity - target_velocity;

        body.orbit_target = Some(to);
        body.settle = None;
        body.elements = None;
        if body.mode == OrbitMode::Orbit {
            match Orbit::from_state(rel, relv, mu, SHAPE_TOLERANCE) {
                Ok(orbit) => body.elements = Some(orbit),
                Err(reason) => {
                    debug!(%id, reason, "no ellipse about new target; flying ballistic");
                    body.mode = OrbitMode::Ballistic;
                }
            }
        }
        info!(%id, name = %body.name, %from, %to, mode = ?body.mode, "SOI transition");
        Some(from)
    }

    fn detect_collisions(&mut self, events: &mut Vec<OrbitEvent>, report: &mut TickReport) {
        let max_radius = self.bodies.values().map(|b| b.radius).fold(0.0, f64::max);
        let mut contacts = BTreeSet::new();
        for (id, body) in self.bodies.iter() {
            for other_id in self.index.query(&body.position, body.radius + max_radius) {
                if other_id <= id {
                    continue;
                }
                let Some(other) = self.bodies.get(other_id) else {
                    continue;
                };
                let resting = (body.mode == OrbitMode::Landed && body.orbit_target == Some(other_id))
                    || (other.mode == OrbitMode::Landed && other.orbit_target == Some(id));
                if !resting && (other.position - body.position).norm() < body.radius + other.radius {
                    contacts.insert((id, other_id));
                }
            }
        }
        for &(a, b) in contacts.difference(&self.contacts) {
            info!(%a, %b, "collision");
            report.collisions += 1;
            events.push(OrbitEvent::Collision { a, b });
        }
        self.contacts = contacts;
    }

    pub(super) fn publish_snapshot(&self) {
        if let Some(handle) = &self.snapshot {
            handle.publish(Snapshot {
                epoch: self.epoch,
                bodies: self.bodies.clone(),
                index: self.index.clone(),
                min_source_mass: self.config.min_source_mass,
                hysteresis: self.config.soi.hysteresis,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
    };

    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        bodies::BodyKind,
        gravity::G,
        kepler::orbits::period_of,
        maneuver::Maneuver,
        time::UT,
    };

    const MU: f64 = 398_600.0;

    fn earth() -> OrbitalBody {
        OrbitalBody::new("Earth", BodyKind::Planet, MU / (G * 1e-9), 6371.0).with_rotation(24.0, 0.0)
    }

    fn earth_moon() -> (OrbitalMechanics, BodyId, BodyId) {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let orbit = Orbit::circular(MU, 384_400.0, 0.0).unwrap();
        let moon = sim
            .register_body(OrbitalBody::new("Moon", BodyKind::Moon, 7.342e22, 1737.0).with_elements(earth, orbit))
            .unwrap();
        (sim, earth, moon)
    }

    fn ship(sim: &mut OrbitalMechanics, target: BodyId, r: f64) -> BodyId {
        let mu = sim.get_body(target).unwrap().mu();
        let orbit = Orbit::circular(mu, r, 0.0).unwrap();
        sim.register_body(OrbitalBody::new("Ship", BodyKind::Spacecraft, 1.0e4, 0.01).with_elements(target, orbit))
            .unwrap()
    }

    /// A ballistic probe `offset` km from `near`, matching its velocity.
    fn probe(sim: &mut OrbitalMechanics, target: BodyId, near: BodyId, offset: f64) -> BodyId {
        let anchor = sim.get_body(near).unwrap();
        let (position, velocity) = (anchor.position + Vector3::new(offset, 0.0, 0.0), anchor.velocity);
        sim.register_body(
            OrbitalBody::new("Probe", BodyKind::Spacecraft, 500.0, 0.005)
                .orbiting(target)
                .with_position(position)
                .with_velocity(velocity),
        )
        .unwrap()
    }

    #[test]
    fn circular_orbit_closes_after_one_period() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        let period = period_of(7000.0, MU);

        let report = sim.tick(period);
        assert_eq!(report.substeps, 583);
        assert_eq!(report.failures, 0);
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Orbit);
        assert_relative_eq!(body.position, Vector3::new(7000.0, 0.0, 0.0), epsilon = 1e-3);
        assert_relative_eq!(sim.epoch().as_seconds_f64(), period, max_relative = 1e-9);
    }

    #[test]
    fn zero_and_invalid_ticks_do_nothing() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        let before = sim.get_body(ship).unwrap().clone();
        for dt in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert_eq!(sim.tick(dt).substeps, 0);
        }
        assert_eq!(sim.get_body(ship).unwrap(), &before);
        assert_eq!(sim.epoch(), UT::ZERO);
    }

    #[test]
    fn ticks_past_the_representable_epoch_are_ignored() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        sim.tick(60.0);
        let before = sim.get_body(ship).unwrap().clone();
        let epoch = sim.epoch();

        assert_eq!(sim.tick(1.0e20), TickReport::default());
        assert_eq!(sim.get_body(ship).unwrap(), &before);
        assert_eq!(sim.epoch(), epoch);
        assert_eq!(sim.snapshot_handle().epoch(), epoch);
    }

    #[test]
    fn ballistic_body_settles_back_onto_rails() {
        let mut sim = OrbitalMechanics::default();
        sim.set_max_time_step(1.0);
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        sim.execute_maneuver(ship, &Maneuver::prograde(0.1)).unwrap();
        assert_eq!(sim.get_body(ship).unwrap().mode(), OrbitMode::Ballistic);

        sim.tick(10.0);
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Orbit);
        let orbit = body.elements().unwrap();
        assert!(orbit.e > 0.02);
        assert_relative_eq!(orbit.periapsis_radius(), 7000.0, max_relative = 1e-3);
        assert_eq!(sim.drain_events(), vec![OrbitEvent::OrbitEstablished { body: ship }]);
    }

    #[test]
    fn crash_course_never_settles() {
        let mut sim = OrbitalMechanics::default();
        sim.set_max_time_step(1.0);
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        sim.execute_maneuver(ship, &Maneuver::prograde(-1.0)).unwrap();
        sim.tick(20.0);
        assert_eq!(sim.get_body(ship).unwrap().mode(), OrbitMode::Ballistic);
        assert!(sim.drain_events().is_empty());
    }

    #[test]
    fn entering_a_moon_soi_changes_target() {
        let (mut sim, earth, moon) = earth_moon();
        let probe = probe(&mut sim, earth, moon, 10_000.0);
        let report = sim.tick(1.0);
        assert_eq!(report.transitions, 1);
        assert_eq!(sim.get_body(probe).unwrap().orbit_target(), Some(moon));
        assert_eq!(sim.get_body(probe).unwrap().mode(), OrbitMode::Ballistic);
        assert_eq!(
            sim.drain_events(),
            vec![OrbitEvent::SoiTransition { body: probe, from: earth, to: moon }]
        );
    }

    #[test]
    fn leaving_a_moon_soi_falls_back_to_the_root() {
        let (mut sim, earth, moon) = earth_moon();
        let probe = probe(&mut sim, moon, moon, 100_000.0);
        sim.tick(1.0);
        assert_eq!(sim.get_body(probe).unwrap().orbit_target(), Some(earth));
        assert!(sim
            .drain_events()
            .contains(&OrbitEvent::SoiTransition { body: probe, from: moon, to: earth }));
    }

    #[test]
    fn primary_only_never_changes_target() {
        let (mut sim, earth, moon) = earth_moon();
        sim.set_gravity_mode(GravityMode::PrimaryOnly);
        let probe = probe(&mut sim, earth, moon, 10_000.0);
        let report = sim.tick(1.0);
        assert_eq!(report.transitions, 0);
        assert_eq!(sim.get_body(probe).unwrap().orbit_target(), Some(earth));
    }

    #[test]
    fn collisions_fire_once_per_contact() {
        let mut sim = OrbitalMechanics::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        sim.subscribe(move |event| {
            if matches!(event, OrbitEvent::Collision { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let rock = |name: &str| OrbitalBody::new(name, BodyKind::Asteroid, 1.0, 1.0).with_gravity(false);
        let a = sim.register_body(rock("A").with_velocity(Vector3::new(1.0, 0.0, 0.0))).unwrap();
        let b = sim.register_body(rock("B").with_position(Vector3::new(12.0, 0.0, 0.0))).unwrap();

        assert_eq!(sim.tick(11.0).collisions, 1);
        assert_eq!(sim.tick(1.0).collisions, 0);
        assert_eq!(sim.drain_events(), vec![OrbitEvent::Collision { a, b }]);

        // A passes through and out the other side, then nothing more.
        sim.tick(3.0);
        assert_eq!(sim.tick(1.0).collisions, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn landed_body_turns_with_its_planet() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        sim.land(ship).unwrap();
        sim.drain_events();

        sim.tick(6.0 * 3600.0);
        let body = sim.get_body(ship).unwrap();
        assert_eq!(body.mode(), OrbitMode::Landed);
        assert_relative_eq!(body.position, Vector3::new(0.0, 6371.01, 0.0), epsilon = 1e-6);
        let spin = sim.get_body(earth).unwrap().angular_velocity();
        assert_relative_eq!(body.velocity, spin.cross(&body.position), epsilon = 1e-12);
        assert!(sim.drain_events().is_empty());
    }

    #[test]
    fn nbody_updates_are_simultaneous() {
        let mut sim = OrbitalMechanics::default();
        sim.set_gravity_mode(GravityMode::NBody);
        let planet = |name: &str, x: f64| {
            OrbitalBody::new(name, BodyKind::Planet, 1.0e24, 1000.0).with_position(Vector3::new(x, 0.0, 0.0))
        };
        let left = sim.register_body(planet("Left", -1.0e5)).unwrap();
        let right = sim.register_body(planet("Right", 1.0e5)).unwrap();
        sim.tick(100.0);

        let (l, r) = (sim.get_body(left).unwrap(), sim.get_body(right).unwrap());
        assert!(l.position.x > -1.0e5);
        assert!(l.velocity.x > 0.0);
        assert_relative_eq!(l.position + r.position, Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(l.velocity + r.velocity, Vector3::zeros(), epsilon = 1e-15);
    }

    #[test]
    fn one_bad_body_does_not_stop_the_rest() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        let runaway = sim
            .register_body(
                OrbitalBody::new("Runaway", BodyKind::Debris, 0.0, 0.0)
                    .with_gravity(false)
                    .with_position(Vector3::new(0.0, 0.0, 1.0e6))
                    .with_velocity(Vector3::new(1.0e308, 0.0, 0.0)),
            )
            .unwrap();
        let before = sim.get_body(ship).unwrap().position;

        let report = sim.tick(10.0);
        assert_eq!(report.failures, 1);
        assert_eq!(sim.get_body(runaway).unwrap().position, Vector3::new(0.0, 0.0, 1.0e6));
        assert!((sim.get_body(ship).unwrap().position - before).norm() > 10.0);
    }

    #[test]
    fn restored_state_evolves_identically() {
        let (mut sim, earth, moon) = earth_moon();
        ship(&mut sim, moon, 2500.0);
        probe(&mut sim, earth, moon, -200_000.0);
        sim.tick(600.0);

        let mut copy = OrbitalMechanics::default();
        copy.load_orbital_state(sim.save_orbital_state()).unwrap();
        assert_eq!(copy.epoch(), sim.epoch());
        sim.tick(3600.0);
        copy.tick(3600.0);
        assert_eq!(copy.save_orbital_state(), sim.save_orbital_state());
    }

    #[test]
    fn settle_progress_survives_a_reload() {
        let mut sim = OrbitalMechanics::default();
        sim.set_max_time_step(1.0);
        let earth = sim.register_body(earth()).unwrap();
        let ship = ship(&mut sim, earth, 7000.0);
        sim.execute_maneuver(ship, &Maneuver::prograde(0.1)).unwrap();
        sim.tick(2.0);
        sim.drain_events();
        assert_eq!(sim.get_body(ship).unwrap().mode(), OrbitMode::Ballistic);

        let mut copy = OrbitalMechanics::default();
        copy.set_max_time_step(1.0);
        copy.load_orbital_state(sim.save_orbital_state()).unwrap();
        let settled = (0..20).find(|_| {
            sim.tick(1.0);
            copy.tick(1.0);
            let mode = sim.get_body(ship).unwrap().mode();
            assert_eq!(copy.get_body(ship).unwrap().mode(), mode);
            mode == OrbitMode::Orbit
        });
        assert!(settled.is_some());
        let established = vec![OrbitEvent::OrbitEstablished { body: ship }];
        assert_eq!(sim.drain_events(), established);
        assert_eq!(copy.drain_events(), established);
        assert_eq!(copy.save_orbital_state(), sim.save_orbital_state());
    }

    #[test]
    fn queued_commands_apply_at_tick_boundary() {
        let mut sim = OrbitalMechanics::default();
        let earth = sim.register_body(earth()).unwrap();
        let snapshot = sim.snapshot_handle();
        let queue = sim.commands();

        thread::spawn(move || {
            queue.register(OrbitalBody::new("Far", BodyKind::Asteroid, 1.0e12, 5.0).with_position(Vector3::new(1.0e7, 0.0, 0.0)));
            queue.unregister(BodyId::default());
        })
        .join()
        .unwrap();
        assert_eq!(sim.body_count(), 1);
        assert_eq!(snapshot.read().bodies.len(), 1);

        let report = sim.tick(1.0);
        assert_eq!(report.commands, 2);
        assert_eq!(sim.body_count(), 2);
        let view = snapshot.read();
        assert_eq!(view.epoch, UT::new_seconds(1.0));
        assert_eq!(view.bodies.len(), 2);
        assert_eq!(view.dominant_body(&Vector3::new(10.0, 0.0, 0.0)), Some(earth));
    }
}
