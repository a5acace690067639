//! Closed-form propagation along Keplerian orbits, plus a
//! universal-variable coast for trajectories that are not (yet) stable
//! ellipses.

use nalgebra::Vector3;
use tracing::{trace, warn};

use super::orbits::{ea_to_ta, ma_to_ea, wrap_two_pi, Orbit};

/// Advances orbits by solving Kepler's equation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeplerPropagator {
    /// Convergence tolerance on the eccentric anomaly (rad).
    pub tolerance: f64,
    /// Newton-Raphson iteration cap.
    pub max_iter: u32,
}

impl Default for KeplerPropagator {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iter: 30,
        }
    }
}

/// A propagated orbit with its primary-relative state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Propagated {
    pub orbit: Orbit,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// `false` if Kepler's equation hit the iteration cap; the state then
    /// comes from the last Newton iterate.
    pub converged: bool,
}

impl Propagated {
    pub fn true_anomaly(&self) -> f64 {
        self.orbit.ta
    }

    pub fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(self.velocity.iter())
            .all(|x| x.is_finite())
            && self.orbit.ta.is_finite()
    }
}

impl KeplerPropagator {
    pub fn new(tolerance: f64, max_iter: u32) -> Self {
        Self {
            tolerance,
            max_iter,
        }
    }

    /// Advance `orbit` by `delta_t` seconds (negative values propagate
    /// backwards) about a primary with parameter `mu`.
    pub fn propagate(&self, orbit: &Orbit, mu: f64, delta_t: f64) -> Propagated {
        let n = orbit.mean_motion();
        let ma = orbit.mean_anomaly() + n * delta_t;
        let sol = ma_to_ea(ma, orbit.e, self.tolerance, self.max_iter);
        if !sol.converged {
            warn!(
                e = orbit.e,
                ma,
                iterations = sol.iterations,
                "Kepler's equation did not converge; using last estimate"
            );
        }

        let mut next = *orbit;
        next.ta = wrap_two_pi(ea_to_ta(sol.ea, orbit.e));
        next.tsp = (orbit.tsp + delta_t).rem_euclid(orbit.period);
        let (position, velocity) = next.state_vector(mu);
        trace!(ta = next.ta, r = position.norm(), "propagated orbit");

        Propagated {
            orbit: next,
            position,
            velocity,
            converged: sol.converged,
        }
    }
}

/// Stumpff functions `c2(ψ)` and `c3(ψ)`.
fn stumpff(psi: f64) -> (f64, f64) {
    if psi > 1e-6 {
        let sq = libm::sqrt(psi);
        ((1.0 - libm::cos(sq)) / psi, (sq - libm::sin(sq)) / (psi * sq))
    } else if psi < -1e-6 {
        let sq = libm::sqrt(-psi);
        (
            (1.0 - libm::cosh(sq)) / psi,
            (libm::sinh(sq) - sq) / libm::sqrt((-psi).powi(3)),
        )
    } else {
        (1.0 / 2.0, 1.0 / 6.0)
    }
}

/// Coast a primary-relative state `delta_t` seconds under two-body
/// gravity using universal variables. Works for elliptic, parabolic and
/// hyperbolic trajectories.
///
/// Returns `None` if the iteration fails to converge within `maxiter` or
/// produces a non-finite state.
pub fn coast(
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    mu: f64,
    delta_t: f64,
    tol: f64,
    maxiter: u32,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    if delta_t == 0.0 {
        return Some((position, velocity));
    }
    let norm_r0 = position.norm();
    if norm_r0 <= 0.0 || mu <= 0.0 {
        return None;
    }
    let sqrt_mu = libm::sqrt(mu);
    let dot_r0v0 = position.dot(&velocity);
    let alpha = -velocity.norm_squared() / mu + 2.0 / norm_r0;

    let mut xn = if alpha > 1e-6 {
        let guess = sqrt_mu * delta_t * alpha;
        if (alpha - 1.0).abs() < 1e-9 {
            guess * 0.97
        } else {
            guess
        }
    } else if alpha < -1e-6 {
        let a = 1.0 / alpha;
        delta_t.signum()
            * libm::sqrt(-a)
            * libm::log(
                (-2.0 * mu * alpha * delta_t)
                    / (dot_r0v0
                        + delta_t.signum() * libm::sqrt(-mu * a) * (1.0 - norm_r0 * alpha)),
            )
    } else {
        let p = position.cross(&velocity).norm_squared() / mu;
        let s = libm::atan2(1.0, 3.0 * delta_t * libm::sqrt(mu / p.powi(3))) / 2.0;
        let w = libm::atan(libm::cbrt(libm::tan(s)));
        libm::sqrt(p) * 2.0 / libm::tan(2.0 * w)
    };
    if !xn.is_finite() {
        return None;
    }

    let mut converged = false;
    let (mut c2, mut c3, mut r, mut psi) = (0.0, 0.0, norm_r0, 0.0);
    for _ in 0..maxiter {
        psi = xn * xn * alpha;
        (c2, c3) = stumpff(psi);
        r = xn * xn * c2 + dot_r0v0 / sqrt_mu * xn * (1.0 - psi * c3) + norm_r0 * (1.0 - psi * c2);
        let next = xn
            + (sqrt_mu * delta_t
                - xn * xn * xn * c3
                - dot_r0v0 / sqrt_mu * xn * xn * c2
                - norm_r0 * xn * (1.0 - psi * c3))
                / r;
        if !next.is_finite() {
            return None;
        }
        let done = (next - xn).abs() < tol;
        xn = next;
        if done {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(delta_t, alpha, "universal-variable coast did not converge");
        return None;
    }

    psi = xn * xn * alpha;
    (c2, c3) = stumpff(psi);
    r = xn * xn * c2 + dot_r0v0 / sqrt_mu * xn * (1.0 - psi * c3) + norm_r0 * (1.0 - psi * c2);

    let f = 1.0 - xn.powi(2) / norm_r0 * c2;
    let g = delta_t - xn.powi(3) / sqrt_mu * c3;
    let gdot = 1.0 - xn.powi(2) / r * c2;
    let fdot = sqrt_mu / (r * norm_r0) * xn * (psi * c3 - 1.0);

    let new_position = f * position + g * velocity;
    let new_velocity = fdot * position + gdot * velocity;
    new_position
        .iter()
        .chain(new_velocity.iter())
        .all(|x| x.is_finite())
        .then_some((new_position, new_velocity))
}

#[cfg(test)]
mod tests {
    use std::f64::consts;

    use approx::assert_relative_eq;

    use super::*;

    const MU_EARTH: f64 = 398_600.0;

    #[test]
    fn circular_orbit_closes_after_one_period() {
        let propagator = KeplerPropagator::default();
        let orbit = Orbit::circular(MU_EARTH, 1000.0, 0.4).unwrap();
        let (start, _) = orbit.state_vector(MU_EARTH);

        let after = propagator.propagate(&orbit, MU_EARTH, orbit.period);
        assert!(after.converged);
        assert_relative_eq!(after.position, start, epsilon = 1e-6);
        assert_relative_eq!(after.orbit.ta, orbit.ta, epsilon = 1e-9);
    }

    #[test]
    fn quarter_period_of_circular_orbit_moves_ninety_degrees() {
        let propagator = KeplerPropagator::default();
        let orbit = Orbit::circular(MU_EARTH, 7000.0, 0.0).unwrap();
        let after = propagator.propagate(&orbit, MU_EARTH, orbit.period / 4.0);
        assert_relative_eq!(after.orbit.ta, consts::FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(after.position.norm(), 7000.0, max_relative = 1e-12);
    }

    #[test]
    fn elliptical_propagation_is_time_reversible() {
        let propagator = KeplerPropagator::new(1e-12, 50);
        for &e in &[0.05, 0.3, 0.7, 0.95] {
            let orbit = Orbit::new(MU_EARTH, 20_000.0, e, 0.3, 0.2, 1.1, 2.0).unwrap();
            let (r0, v0) = orbit.state_vector(MU_EARTH);
            let fwd = propagator.propagate(&orbit, MU_EARTH, 4321.0);
            let back = propagator.propagate(&fwd.orbit, MU_EARTH, -4321.0);
            assert_relative_eq!(back.position, r0, epsilon = 1e-5);
            assert_relative_eq!(back.velocity, v0, epsilon = 1e-9);
        }
    }

    #[test]
    fn propagation_conserves_energy() {
        let propagator = KeplerPropagator::default();
        let orbit = Orbit::new(MU_EARTH, 15_000.0, 0.4, 0.1, 0.0, 0.0, 0.0).unwrap();
        let energy = |r: Vector3<f64>, v: Vector3<f64>| v.norm_squared() / 2.0 - MU_EARTH / r.norm();
        let (r0, v0) = orbit.state_vector(MU_EARTH);
        let e0 = energy(r0, v0);
        let mut current = orbit;
        for _ in 0..20 {
            let step = propagator.propagate(&current, MU_EARTH, 777.0);
            assert_relative_eq!(energy(step.position, step.velocity), e0, max_relative = 1e-9);
            current = step.orbit;
        }
    }

    #[test]
    fn coast_matches_closed_form() {
        let propagator = KeplerPropagator::new(1e-12, 50);
        let orbit = Orbit::new(MU_EARTH, 10_000.0, 0.2, 0.4, 0.3, 0.2, 0.1).unwrap();
        let (r0, v0) = orbit.state_vector(MU_EARTH);
        let kepler = propagator.propagate(&orbit, MU_EARTH, 2500.0);
        let (r1, v1) = coast(r0, v0, MU_EARTH, 2500.0, 1e-9, 100).unwrap();
        assert_relative_eq!(r1, kepler.position, epsilon = 1e-4);
        assert_relative_eq!(v1, kepler.velocity, epsilon = 1e-7);
    }

    #[test]
    fn coast_handles_hyperbolic_escape() {
        let r0 = Vector3::new(7000.0, 0.0, 0.0);
        let v0 = Vector3::new(0.0, 12.0, 0.0);
        let (r1, v1) = coast(r0, v0, MU_EARTH, 3600.0, 1e-9, 100).unwrap();
        let energy = |r: Vector3<f64>, v: Vector3<f64>| v.norm_squared() / 2.0 - MU_EARTH / r.norm();
        assert!(r1.norm() > r0.norm());
        assert_relative_eq!(energy(r1, v1), energy(r0, v0), max_relative = 1e-8);
    }
}
