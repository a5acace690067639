//! Hohmann transfers between bodies sharing a primary, and the search for
//! the next departure window.

use std::f64::consts;

use argmin::{
    core::{CostFunction, Executor, State},
    solver::brent::BrentRoot,
};
use nalgebra::{Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    bodies::{BodyId, OrbitMode, OrbitalBody, Registry},
    config::WindowSettings,
    error::{OrbitError, Result},
    kepler::{
        orbits::{period_of, wrap_pi},
        KeplerPropagator, Orbit,
    },
    time::UT,
};

/// A two-impulse transfer between coplanar circular orbits.
///
/// Delta-v values are signed along the local prograde direction, so an
/// inward transfer has negative burns.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HohmannTransfer {
    pub primary: BodyId,
    /// Departure orbit radius (km)
    pub r1: f64,
    /// Arrival orbit radius (km)
    pub r2: f64,
    /// Departure burn (km/s)
    pub delta_v1: f64,
    /// Circularization burn (km/s)
    pub delta_v2: f64,
    /// Half the transfer ellipse's period (s)
    pub transfer_time: f64,
}

impl HohmannTransfer {
    /// `None` if either radius or `mu` is not positive and finite.
    pub fn new(primary: BodyId, mu: f64, r1: f64, r2: f64) -> Option<Self> {
        if ![mu, r1, r2].iter().all(|x| x.is_finite() && *x > 0.0) {
            return None;
        }
        let sum = r1 + r2;
        let delta_v1 = libm::sqrt(mu / r1) * (libm::sqrt(2.0 * r2 / sum) - 1.0);
        let delta_v2 = libm::sqrt(mu / r2) * (1.0 - libm::sqrt(2.0 * r1 / sum));
        let transfer_time = consts::PI * libm::sqrt((sum / 2.0).powi(3) / mu);
        Some(Self {
            primary,
            r1,
            r2,
            delta_v1,
            delta_v2,
            transfer_time,
        })
    }

    pub fn semi_major_axis(&self) -> f64 {
        (self.r1 + self.r2) / 2.0
    }

    /// Sum of the burn magnitudes (km/s).
    pub fn total_delta_v(&self) -> f64 {
        self.delta_v1.abs() + self.delta_v2.abs()
    }
}

/// The next departure opportunity for a Hohmann transfer.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferWindow {
    pub transfer: HohmannTransfer,
    /// Seconds from the planning epoch until departure.
    pub wait: f64,
    pub departure: UT,
    /// Lead of the target over the departing body at departure (rad).
    pub required_phase: f64,
    /// Residual phase error at the returned departure time (rad).
    pub phase_error: f64,
    /// Time between successive windows (s); infinite for equal periods.
    pub synodic_period: f64,
}

/// `1 / |1/T1 - 1/T2|`, infinite when the periods match.
pub fn synodic_period(t1: f64, t2: f64) -> f64 {
    let rate = (1.0 / t1 - 1.0 / t2).abs();
    if rate > 0.0 {
        1.0 / rate
    } else {
        f64::INFINITY
    }
}

/// Predicts a body's primary-relative position.
#[derive(Copy, Clone, Debug)]
enum Track {
    /// On rails along its elements.
    Kepler { orbit: Orbit, mu: f64 },
    /// Free-flying bodies are approximated by a circle at their current
    /// radius.
    Circular {
        position: Vector3<f64>,
        axis: Unit<Vector3<f64>>,
        rate: f64,
    },
}

impl Track {
    fn position_at(&self, propagator: &KeplerPropagator, t: f64) -> Vector3<f64> {
        match *self {
            Track::Kepler { orbit, mu } => propagator.propagate(&orbit, mu, t).position,
            Track::Circular {
                position,
                axis,
                rate,
            } => Rotation3::from_axis_angle(&axis, rate * t) * position,
        }
    }

    fn period(&self) -> f64 {
        match *self {
            Track::Kepler { orbit, .. } => orbit.period,
            Track::Circular { rate, .. } => 2.0 * consts::PI / rate,
        }
    }

    fn normal(&self) -> Unit<Vector3<f64>> {
        match *self {
            Track::Kepler { orbit, .. } => Unit::new_normalize(orbit.pqw_to_world().column(2).into_owned()),
            Track::Circular { axis, .. } => axis,
        }
    }
}

/// Phase mismatch as a function of departure delay.
#[derive(Copy, Clone)]
struct PhaseProblem<'a> {
    propagator: &'a KeplerPropagator,
    from: Track,
    to: Track,
    normal: Unit<Vector3<f64>>,
    required_phase: f64,
}

impl PhaseProblem<'_> {
    /// Angle from the departing body to the target about the departure
    /// orbit's normal, `delay` seconds from now.
    fn phase(&self, delay: f64) -> f64 {
        let r1 = self.from.position_at(self.propagator, delay);
        let r2 = self.to.position_at(self.propagator, delay);
        libm::atan2(self.normal.dot(&r1.cross(&r2)), r1.dot(&r2))
    }

    fn residual(&self, delay: f64) -> f64 {
        wrap_pi(self.phase(delay) - self.required_phase)
    }
}

impl CostFunction for PhaseProblem<'_> {
    type Param = f64;

    type Output = f64;

    fn cost(&self, param: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.residual(*param))
    }
}

/// Plans transfers from borrowed registry state.
pub struct TransferPlanner<'a> {
    registry: &'a Registry,
    propagator: KeplerPropagator,
    settings: WindowSettings,
}

impl<'a> TransferPlanner<'a> {
    pub fn new(registry: &'a Registry, propagator: KeplerPropagator, settings: WindowSettings) -> Self {
        Self {
            registry,
            propagator,
            settings,
        }
    }

    fn body(&self, id: BodyId) -> Result<&'a OrbitalBody> {
        self.registry.get(id).ok_or(OrbitError::UnknownBody(id))
    }

    /// The shared primary of `from` and `to`.
    fn common_primary(&self, from: BodyId, to: BodyId) -> Result<(&'a OrbitalBody, &'a OrbitalBody, BodyId)> {
        let (a, b) = (self.body(from)?, self.body(to)?);
        match (a.orbit_target, b.orbit_target) {
            (Some(pa), Some(pb)) if pa == pb => Ok((a, b, pa)),
            _ => Err(OrbitError::NoCommonPrimary { from, to }),
        }
    }

    /// Orbit radius of `body` about `primary`: the semi-major axis when on
    /// rails, the current distance otherwise.
    fn orbit_radius(id: BodyId, body: &OrbitalBody, primary: &OrbitalBody) -> Result<f64> {
        let degenerate = |reason: &str| OrbitError::DegenerateOrbit {
            body: id,
            reason: reason.into(),
        };
        let r = match (body.mode, body.elements.as_ref()) {
            (OrbitMode::Landed, _) => return Err(degenerate("landed bodies are not in orbit")),
            (OrbitMode::Orbit, Some(orbit)) => orbit.a,
            _ => (body.position - primary.position).norm(),
        };
        if r.is_finite() && r > 0.0 {
            Ok(r)
        } else {
            Err(degenerate("orbit radius must be positive"))
        }
    }

    pub fn calculate_hohmann_transfer(&self, from: BodyId, to: BodyId) -> Result<HohmannTransfer> {
        let (a, b, primary_id) = self.common_primary(from, to)?;
        let primary = self.body(primary_id)?;
        let r1 = Self::orbit_radius(from, a, primary)?;
        let r2 = Self::orbit_radius(to, b, primary)?;
        HohmannTransfer::new(primary_id, primary.mu(), r1, r2).ok_or_else(|| OrbitError::DegenerateOrbit {
            body: primary_id,
            reason: "primary has no gravitational parameter".into(),
        })
    }

    fn track(&self, id: BodyId, body: &OrbitalBody, primary: &OrbitalBody) -> Result<Track> {
        if let (OrbitMode::Orbit, Some(orbit)) = (body.mode, body.elements) {
            return Ok(Track::Kepler {
                orbit,
                mu: primary.mu(),
            });
        }
        let position = body.position - primary.position;
        let velocity = body.velocity - primary.velocity;
        let r = position.norm();
        let axis = Unit::try_new(position.cross(&velocity), f64::EPSILON).unwrap_or_else(Vector3::z_axis);
        let rate = libm::sqrt(primary.mu() / r.powi(3));
        if !(rate.is_finite() && rate > 0.0) {
            return Err(OrbitError::DegenerateOrbit {
                body: id,
                reason: "cannot predict motion about a massless primary".into(),
            });
        }
        Ok(Track::Circular {
            position,
            axis,
            rate,
        })
    }

    /// Find the first time after `now` at which departing on a Hohmann
    /// transfer from `from` meets `to` at the arrival apsis.
    ///
    /// The search covers one synodic period, capped at
    /// `max_search_periods` of the longer orbital period; near-equal
    /// periods therefore end with [`OrbitError::NoTransferWindow`] rather
    /// than an unbounded search.
    pub fn calculate_transfer_window(&self, from: BodyId, to: BodyId, now: UT) -> Result<TransferWindow> {
        let transfer = self.calculate_hohmann_transfer(from, to)?;
        let (a, b, primary_id) = self.common_primary(from, to)?;
        let primary = self.body(primary_id)?;
        let no_window = |reason: &str| OrbitError::NoTransferWindow {
            from,
            to,
            reason: reason.into(),
        };

        let from_track = self.track(from, a, primary)?;
        let to_track = self.track(to, b, primary)?;
        let (t1, t2) = (from_track.period(), to_track.period());
        let synodic = synodic_period(t1, t2);
        let required_phase =
            wrap_pi(consts::PI - 2.0 * consts::PI / t2 * transfer.transfer_time);
        let problem = PhaseProblem {
            propagator: &self.propagator,
            from: from_track,
            to: to_track,
            normal: from_track.normal(),
            required_phase,
        };
        let window = |wait: f64, phase_error: f64| TransferWindow {
            transfer,
            wait,
            departure: now.advanced(wait),
            required_phase,
            phase_error,
            synodic_period: synodic,
        };

        let tolerance = self.settings.angular_tolerance;
        let f0 = problem.residual(0.0);
        if f0.abs() <= tolerance {
            return Ok(window(0.0, f0));
        }
        let relative_rate = (2.0 * consts::PI / t1 - 2.0 * consts::PI / t2).abs();
        if relative_rate == 0.0 {
            return Err(no_window("orbital periods are identical"));
        }

        let horizon = synodic.min(self.settings.max_search_periods * t1.max(t2));
        let steps = self.settings.scan_steps.max(2);
        let step = horizon / f64::from(steps);
        debug!(%from, %to, horizon, synodic, required_phase, "scanning for transfer window");

        let (mut lo, mut f_lo) = (0.0, f0);
        // One extra sample so a window landing exactly on the horizon is
        // still bracketed.
        for k in 1..=steps + 1 {
            let hi = step * f64::from(k);
            let f_hi = problem.residual(hi);
            if f_hi.abs() <= tolerance {
                return Ok(window(hi, f_hi));
            }
            // Sign flips across the ±π wrap are not roots.
            if f_lo.signum() != f_hi.signum() && f_lo.abs() < consts::FRAC_PI_2 && f_hi.abs() < consts::FRAC_PI_2 {
                let wait = self.refine(&problem, (lo, f_lo), (hi, f_hi), relative_rate);
                return Ok(window(wait, problem.residual(wait)));
            }
            (lo, f_lo) = (hi, f_hi);
        }
        Err(no_window("phase never matches within the search horizon"))
    }

    /// Narrow a bracketed phase match with Brent's method, falling back to
    /// the secant estimate if the solver fails.
    fn refine(&self, problem: &PhaseProblem<'_>, (lo, f_lo): (f64, f64), (hi, f_hi): (f64, f64), rate: f64) -> f64 {
        let secant = lo - f_lo * (hi - lo) / (f_hi - f_lo);
        let tol = self.settings.angular_tolerance / rate;
        let solver = BrentRoot::new(lo, hi, tol);
        let refined = Executor::new(*problem, solver)
            .configure(|state| state.max_iters(self.settings.max_iters))
            .run()
            .map_err(|err| warn!(%err, "transfer window refinement failed"))
            .ok()
            .and_then(|res| res.state.get_param().copied())
            .filter(|t| (lo..=hi).contains(t));
        match refined {
            Some(t) if problem.residual(t).abs() <= problem.residual(secant).abs() => t,
            _ => secant,
        }
    }
}
