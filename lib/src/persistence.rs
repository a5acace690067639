//! The data shape of a saved universe.
//!
//! Reading and writing files is the caller's business; the core only
//! converts between the registry and [`OrbitalState`].

use std::collections::BTreeSet;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::{
    arena::IdLike,
    bodies::{orbit_depth, BodyId, BodyKind, LandedTransform, OrbitMode, OrbitalBody, Registry, SettleTracker},
    error::{OrbitError, Result},
    kepler::Orbit,
    time::UT,
};

/// Version number for the save format (increment when the format changes)
pub const SAVE_VERSION: u32 = 1;

/// Serializable snapshot of the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrbitalState {
    pub version: u32,
    pub epoch: UT,
    pub bodies: Vec<SavedBody>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedBody {
    pub id: BodyId,
    pub name: String,
    pub kind: BodyKind,
    pub mass: f64,
    pub radius: f64,
    #[serde(default)]
    pub rotation_period: f64,
    #[serde(default)]
    pub axial_tilt: f64,
    #[serde(default)]
    pub rotation_angle: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub mode: OrbitMode,
    pub orbit_target: Option<BodyId>,
    #[serde(default)]
    pub elements: Option<Orbit>,
    #[serde(default)]
    pub landed: Option<LandedTransform>,
    #[serde(default)]
    pub thrust: Vector3<f64>,
    pub gravity_enabled: bool,
    pub time_warp_factor: f64,
    /// Progress towards settling a ballistic body back onto rails.
    #[serde(default)]
    pub settle: Option<SettleTracker>,
}

impl SavedBody {
    pub fn from_body(id: BodyId, body: &OrbitalBody) -> Self {
        Self {
            id,
            name: body.name.clone(),
            kind: body.kind,
            mass: body.mass(),
            radius: body.radius,
            rotation_period: body.rotation_period(),
            axial_tilt: body.axial_tilt(),
            rotation_angle: body.rotation_angle,
            position: body.position,
            velocity: body.velocity,
            mode: body.mode,
            orbit_target: body.orbit_target,
            elements: body.elements,
            landed: body.landed,
            thrust: body.thrust,
            gravity_enabled: body.gravity_enabled,
            time_warp_factor: body.time_warp_factor,
            settle: body.settle,
        }
    }

    pub fn into_body(self) -> OrbitalBody {
        let mut body = OrbitalBody::new(self.name, self.kind, self.mass, self.radius)
            .with_rotation(self.rotation_period, self.axial_tilt)
            .with_position(self.position)
            .with_velocity(self.velocity)
            .with_gravity(self.gravity_enabled);
        body.id = Some(self.id);
        body.rotation_angle = self.rotation_angle;
        body.mode = self.mode;
        body.orbit_target = self.orbit_target;
        body.elements = self.elements;
        body.landed = self.landed;
        body.thrust = self.thrust;
        body.time_warp_factor = self.time_warp_factor;
        body.settle = self.settle;
        body
    }
}

impl OrbitalState {
    pub fn capture(epoch: UT, registry: &Registry) -> Self {
        Self {
            version: SAVE_VERSION,
            epoch,
            bodies: registry
                .iter()
                .map(|(id, body)| SavedBody::from_body(id, body))
                .collect(),
        }
    }

    /// Rebuild a registry, checking every invariant a live registry
    /// holds. Nothing is returned unless the whole state is consistent.
    pub fn into_registry(self) -> Result<(UT, Registry)> {
        let invalid = |msg: String| OrbitError::InvalidState(msg);
        if self.version != SAVE_VERSION {
            return Err(invalid(format!(
                "unsupported save version {} (expected {SAVE_VERSION})",
                self.version
            )));
        }

        let mut registry = Registry::new();
        let mut seen = BTreeSet::new();
        for saved in self.bodies {
            let id = saved.id;
            if !seen.insert(id) {
                return Err(invalid(format!("duplicate body ID {id}")));
            }
            if id.into_raw() == u64::MAX {
                return Err(invalid(format!("body ID {id} leaves no room for new bodies")));
            }
            let body = saved.into_body();
            body.validate()
                .map_err(|err| invalid(format!("body {id}: {err}")))?;
            registry.insert(id, body);
        }

        for (id, body) in registry.iter() {
            if let Some(target) = body.orbit_target {
                let primary = registry
                    .get(target)
                    .ok_or_else(|| invalid(format!("body {id} orbits missing body {target}")))?;
                if let (OrbitMode::Orbit, Some(orbit)) = (body.mode, body.elements.as_ref()) {
                    orbit
                        .validate(primary.mu())
                        .map_err(|reason| invalid(format!("body {id}: {reason}")))?;
                }
            }
            if orbit_depth(&registry, id).is_none() {
                return Err(invalid(format!("orbit chain of body {id} contains a cycle")));
            }
        }
        Ok((self.epoch, registry))
    }
}
