//! Keplerian orbital elements and their conversion to and from state
//! vectors.

use std::f64::consts;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Elements below this are treated as zero when classifying an orbit as
/// circular or equatorial.
pub const SHAPE_TOLERANCE: f64 = 1e-9;

/// An elliptical Keplerian orbit about some primary.
///
/// Positions derived from these elements are relative to the primary's
/// center.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orbit {
    /// Semi-major axis (km).
    pub a: f64,
    /// Eccentricity (dimensionless, `0 <= e < 1`).
    pub e: f64,
    /// Inclination (radians).
    pub i: f64,
    /// Longitude of ascending node (radians).
    pub lan: f64,
    /// Argument of periapsis (radians).
    pub argpe: f64,
    /// True anomaly (radians).
    pub ta: f64,
    /// Orbital period (s).
    pub period: f64,
    /// Time since the last periapsis passage (s).
    pub tsp: f64,
}

impl Orbit {
    /// Build an orbit from its shape and orientation, deriving the period
    /// and time since periapsis from `mu` (`km^3/s^2`).
    pub fn new(
        mu: f64,
        a: f64,
        e: f64,
        i: f64,
        lan: f64,
        argpe: f64,
        ta: f64,
    ) -> Result<Self, &'static str> {
        check_shape(mu, a, e)?;
        if ![i, lan, argpe, ta].iter().all(|x| x.is_finite()) {
            return Err("orbit angles must be finite");
        }
        let period = period_of(a, mu);
        if !(period.is_finite() && period > 0.0) {
            return Err("orbital period must be positive");
        }
        let mut orbit = Self {
            a,
            e,
            i,
            lan: wrap_two_pi(lan),
            argpe: wrap_two_pi(argpe),
            ta: wrap_two_pi(ta),
            period,
            tsp: 0.0,
        };
        orbit.tsp = orbit.mean_anomaly() / orbit.mean_motion();
        Ok(orbit)
    }

    /// A circular, equatorial orbit of the given radius.
    pub fn circular(mu: f64, radius: f64, ta: f64) -> Result<Self, &'static str> {
        Self::new(mu, radius, 0.0, 0.0, 0.0, 0.0, ta)
    }

    /// Re-validate elements that did not come through [`Orbit::new`], e.g.
    /// from a save file.
    pub fn validate(&self, mu: f64) -> Result<(), &'static str> {
        check_shape(mu, self.a, self.e)?;
        if ![self.i, self.lan, self.argpe, self.ta, self.tsp]
            .iter()
            .all(|x| x.is_finite())
        {
            return Err("orbit angles must be finite");
        }
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err("orbital period must be positive");
        }
        Ok(())
    }

    pub fn semi_latus_rectum(&self) -> f64 {
        self.a * (1.0 - self.e.powi(2))
    }

    pub fn periapsis_radius(&self) -> f64 {
        self.a * (1.0 - self.e)
    }

    pub fn apoapsis_radius(&self) -> f64 {
        self.a * (1.0 + self.e)
    }

    /// Mean motion `n = 2π / T` (rad/s).
    pub fn mean_motion(&self) -> f64 {
        2.0 * consts::PI / self.period
    }

    /// Orbit equation `r = a(1-e²)/(1+e·cos(ν))`.
    pub fn radius_at(&self, ta: f64) -> f64 {
        self.semi_latus_rectum() / (1.0 + self.e * libm::cos(ta))
    }

    pub fn eccentric_anomaly(&self) -> f64 {
        ta_to_ea(self.ta, self.e)
    }

    /// Mean anomaly in `[0, 2π)`.
    pub fn mean_anomaly(&self) -> f64 {
        wrap_two_pi(ea_to_ma(self.eccentric_anomaly(), self.e))
    }

    /// Position and velocity in the perifocal frame PQW at the current
    /// true anomaly.
    fn sv_pqw(&self, mu: f64) -> (Vector3<f64>, Vector3<f64>) {
        let p = self.semi_latus_rectum();
        let r = self.radius_at(self.ta);
        let (sin_ta, cos_ta) = (libm::sin(self.ta), libm::cos(self.ta));
        let rv = Vector3::new(r * cos_ta, r * sin_ta, 0.0);
        let vv = libm::sqrt(mu / p) * Vector3::new(-sin_ta, self.e + cos_ta, 0.0);
        (rv, vv)
    }

    /// Rotation from the perifocal frame into the primary-centered
    /// world axes (3-1-3 sequence through Ω, i, ω).
    pub fn pqw_to_world(&self) -> Matrix3<f64> {
        let (sl, cl) = (libm::sin(self.lan), libm::cos(self.lan));
        let (sw, cw) = (libm::sin(self.argpe), libm::cos(self.argpe));
        let (si, ci) = (libm::sin(self.i), libm::cos(self.i));

        Matrix3::new(
            cl * cw - sl * sw * ci,
            -cl * sw - sl * cw * ci,
            sl * si,
            sl * cw + cl * sw * ci,
            -sl * sw + cl * cw * ci,
            -cl * si,
            sw * si,
            cw * si,
            ci,
        )
    }

    /// Position and velocity relative to the primary at the current true
    /// anomaly.
    pub fn state_vector(&self, mu: f64) -> (Vector3<f64>, Vector3<f64>) {
        let (rv, vv) = self.sv_pqw(mu);
        let mat = self.pqw_to_world();
        (mat * rv, mat * vv)
    }

    /// Recover elliptical elements from a primary-relative state vector.
    ///
    /// Circular orbits report `argpe = 0` with the argument of latitude in
    /// `ta`; equatorial orbits report `lan = 0` with the longitude of
    /// periapsis in `argpe`.
    pub fn from_state(
        rv: Vector3<f64>,
        vv: Vector3<f64>,
        mu: f64,
        tol: f64,
    ) -> Result<Self, &'static str> {
        if !(mu.is_finite() && mu > 0.0) {
            return Err("gravitational parameter must be positive");
        }
        if !rv.iter().chain(vv.iter()).all(|x| x.is_finite()) {
            return Err("state vector is not finite");
        }
        let r = rv.norm();
        if r <= 0.0 {
            return Err("position coincides with the primary");
        }
        let v = vv.norm();
        let hv = rv.cross(&vv);
        let h = hv.norm();
        if h <= f64::EPSILON * r * v.max(1.0) {
            return Err("radial trajectory has no orbital plane");
        }

        let energy = v.powi(2) / 2.0 - mu / r;
        if energy >= 0.0 {
            return Err("trajectory is not bound (e >= 1)");
        }
        let a = -mu / (2.0 * energy);
        let ev = ((v.powi(2) - mu / r) * rv - rv.dot(&vv) * vv) / mu;
        let e = ev.norm();
        let i = libm::acos((hv[2] / h).clamp(-1.0, 1.0));
        let nv = Vector3::new(0.0, 0.0, 1.0).cross(&hv);

        let circular = e < tol;
        let equatorial = i < tol || consts::PI - i < tol;
        // Retrograde equatorial orbits measure longitudes the other way round.
        let s = if hv[2] >= 0.0 { 1.0 } else { -1.0 };

        let (lan, argpe, ta) = match (equatorial, circular) {
            (true, false) => (
                0.0,
                libm::atan2(s * ev[1], ev[0]),
                libm::atan2(hv.dot(&ev.cross(&rv)) / h, rv.dot(&ev)),
            ),
            (false, true) => (
                libm::atan2(nv[1], nv[0]),
                0.0,
                // Argument of latitude
                libm::atan2(rv.dot(&hv.cross(&nv)) / h, rv.dot(&nv)),
            ),
            (true, true) => (
                0.0,
                0.0,
                // True longitude
                libm::atan2(s * rv[1], rv[0]),
            ),
            (false, false) => {
                let ta = libm::atan2(hv.dot(&ev.cross(&rv)) / h, rv.dot(&ev));
                let lan = libm::atan2(nv[1], nv[0]);
                let u = libm::atan2(rv.dot(&hv.cross(&nv)) / h, rv.dot(&nv));
                (lan, u - ta, ta)
            }
        };

        // Near-circular orbits are snapped to e = 0 so the angles above stay
        // consistent with the position they were measured from.
        let e = if circular { 0.0 } else { e };
        Self::new(mu, a, e, i, lan, argpe, ta)
    }
}

fn check_shape(mu: f64, a: f64, e: f64) -> Result<(), &'static str> {
    if !(mu.is_finite() && mu > 0.0) {
        return Err("gravitational parameter must be positive");
    }
    if !(a.is_finite() && a > 0.0) {
        return Err("semi-major axis must be positive");
    }
    if !(e.is_finite() && (0.0..1.0).contains(&e)) {
        return Err("eccentricity must be in [0, 1)");
    }
    Ok(())
}

/// Period of an elliptical orbit, `2π·sqrt(a³/μ)` (s).
pub fn period_of(a: f64, mu: f64) -> f64 {
    2.0 * consts::PI * libm::sqrt(a.powi(3) / mu)
}

/// Speed of a circular orbit of radius `r`, `sqrt(μ/r)` (km/s).
pub fn circular_speed(r: f64, mu: f64) -> f64 {
    libm::sqrt(mu / r)
}

pub fn wrap_two_pi(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(2.0 * consts::PI);
    // rem_euclid can round up to exactly 2π for tiny negative inputs.
    if wrapped >= 2.0 * consts::PI {
        0.0
    } else {
        wrapped
    }
}

/// Wrap into `[-π, π)`.
pub fn wrap_pi(angle: f64) -> f64 {
    wrap_two_pi(angle + consts::PI) - consts::PI
}

pub fn ta_to_ea(ta: f64, e: f64) -> f64 {
    2.0 * libm::atan2(
        libm::sqrt(1.0 - e) * libm::sin(ta / 2.0),
        libm::sqrt(1.0 + e) * libm::cos(ta / 2.0),
    )
}

pub fn ea_to_ta(ea: f64, e: f64) -> f64 {
    let beta = e / (1.0 + libm::sqrt(1.0 - e.powi(2)));
    ea + 2.0 * libm::atan2(beta * libm::sin(ea), 1.0 - beta * libm::cos(ea))
}

pub fn ea_to_ma(ea: f64, e: f64) -> f64 {
    ea - e * libm::sin(ea)
}

/// Result of solving Kepler's equation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeplerSolution {
    /// Eccentric anomaly (radians); the last iterate if not converged.
    pub ea: f64,
    pub converged: bool,
    pub iterations: u32,
}

/// Solve `M = E - e·sin(E)` for `E` by Newton-Raphson.
///
/// Stops when successive iterates differ by less than `tol` or after
/// `maxiter` steps, whichever comes first.
pub fn ma_to_ea(ma: f64, e: f64, tol: f64, maxiter: u32) -> KeplerSolution {
    let ma = wrap_two_pi(ma);
    let mut ea = if ma > consts::PI { ma - e } else { ma + e };

    for iter in 0..maxiter {
        let step = (ma - ea + e * libm::sin(ea)) / (1.0 - e * libm::cos(ea));
        if !step.is_finite() {
            return KeplerSolution {
                ea,
                converged: false,
                iterations: iter,
            };
        }
        ea += step;
        if step.abs() < tol {
            return KeplerSolution {
                ea,
                converged: true,
                iterations: iter + 1,
            };
        }
    }

    KeplerSolution {
        ea,
        converged: false,
        iterations: maxiter,
    }
}
