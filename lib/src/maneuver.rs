//! Impulsive burns expressed in a body's Frenet frame.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::kepler::Orbit;

/// An impulsive burn.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    /// Delta-V vector in the Frenet frame: prograde, orbit normal,
    /// binormal (km/s).
    pub deltav: Vector3<f64>,
}

impl Maneuver {
    pub fn new(prograde: f64, normal: f64, binormal: f64) -> Self {
        Self {
            deltav: Vector3::new(prograde, normal, binormal),
        }
    }

    pub fn prograde(deltav: f64) -> Self {
        Self::new(deltav, 0.0, 0.0)
    }

    pub fn magnitude(&self) -> f64 {
        self.deltav.norm()
    }

    /// The burn in world axes for a body with the given primary-relative
    /// state, or `None` if the frame is undefined (zero velocity or purely
    /// radial motion).
    pub fn deltav_world(&self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> Option<Vector3<f64>> {
        frenet(position, velocity).map(|m| m * self.deltav)
    }

    /// Predict the resultant orbit from this maneuver.
    ///
    /// Recommended tolerance (`tol`): `1e-8`.
    pub fn predict_orbit(
        &self,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        mu: f64,
        tol: f64,
    ) -> Result<Orbit, &'static str> {
        let deltav = self
            .deltav_world(&position, &velocity)
            .ok_or("frenet frame is undefined for this state")?;
        Orbit::from_state(position, velocity + deltav, mu, tol)
    }
}

/// Returns the Frenet frame to world conversion matrix for the given
/// primary-relative state.
pub fn frenet(position: &Vector3<f64>, velocity: &Vector3<f64>) -> Option<Matrix3<f64>> {
    let t = velocity.try_normalize(f64::EPSILON)?;
    let n = position.cross(velocity).try_normalize(f64::EPSILON)?;
    let b = t.cross(&n);
    Some(Matrix3::from_columns(&[t, n, b]))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::transfer::HohmannTransfer;

    const MU: f64 = 398_600.0;

    #[test]
    fn prograde_burn_follows_velocity() {
        let r = Vector3::new(7000.0, 0.0, 0.0);
        let v = Vector3::new(0.0, 7.5, 0.0);
        let dv = Maneuver::prograde(0.1).deltav_world(&r, &v).unwrap();
        assert_relative_eq!(dv, Vector3::new(0.0, 0.1, 0.0), epsilon = 1e-12);

        let normal = Maneuver::new(0.0, 0.2, 0.0).deltav_world(&r, &v).unwrap();
        assert_relative_eq!(normal, Vector3::new(0.0, 0.0, 0.2), epsilon = 1e-12);
    }

    #[test]
    fn radial_motion_has_no_frame() {
        let r = Vector3::new(7000.0, 0.0, 0.0);
        assert!(frenet(&r, &Vector3::new(1.0, 0.0, 0.0)).is_none());
        assert!(frenet(&r, &Vector3::zeros()).is_none());
    }

    #[test]
    fn hohmann_departure_burn_raises_apoapsis() {
        let orbit = Orbit::circular(MU, 7000.0, 0.0).unwrap();
        let (r, v) = orbit.state_vector(MU);
        let t = HohmannTransfer::new(Default::default(), MU, 7000.0, 42_000.0).unwrap();
        let predicted = Maneuver::prograde(t.delta_v1).predict_orbit(r, v, MU, 1e-8).unwrap();
        assert_relative_eq!(predicted.periapsis_radius(), 7000.0, max_relative = 1e-9);
        assert_relative_eq!(predicted.apoapsis_radius(), 42_000.0, max_relative = 1e-9);
    }
}
