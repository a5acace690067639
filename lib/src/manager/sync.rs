//! Cross-thread access to a running simulation.
//!
//! The registry is only mutated on the thread that drives
//! [`super::OrbitalMechanics::tick`]. Other threads queue registrations
//! through a [`CommandQueue`] and read from a [`SnapshotHandle`], which the
//! manager republishes at every tick boundary.

use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::{
    bodies::{BodyId, OrbitalBody, Registry},
    soi::SoiResolver,
    spatial::Octree,
    time::UT,
};

/// Registry changes deferred to the next tick boundary.
#[derive(Clone, Debug)]
pub enum Command {
    Register(Box<OrbitalBody>),
    Unregister(BodyId),
}

#[derive(Clone, Debug, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<Vec<Command>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, body: OrbitalBody) {
        self.inner.lock().push(Command::Register(Box::new(body)));
    }

    pub fn unregister(&self, id: BodyId) {
        self.inner.lock().push(Command::Unregister(id));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub(crate) fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Immutable copy of the registry and index taken at a tick boundary.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub epoch: UT,
    pub bodies: Registry,
    pub(crate) index: Octree,
    pub(crate) min_source_mass: f64,
    pub(crate) hysteresis: f64,
}

impl Snapshot {
    pub fn body(&self, id: BodyId) -> Option<&OrbitalBody> {
        self.bodies.get(id)
    }

    pub fn all_bodies(&self) -> impl Iterator<Item = (BodyId, &OrbitalBody)> {
        self.bodies.iter()
    }

    pub fn find_bodies_in_radius(&self, position: &Vector3<f64>, radius: f64) -> Vec<BodyId> {
        self.index.query(position, radius)
    }

    fn resolver(&self) -> SoiResolver<'_> {
        SoiResolver::new(&self.bodies, &self.index, self.min_source_mass, self.hysteresis)
    }

    pub fn dominant_body(&self, position: &Vector3<f64>) -> Option<BodyId> {
        self.resolver().dominant_body(position)
    }

    pub fn is_in_soi(&self, position: &Vector3<f64>, id: BodyId) -> bool {
        self.resolver().is_in_soi(position, id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Snapshot>>,
}

impl SnapshotHandle {
    pub fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read()
    }

    pub fn epoch(&self) -> UT {
        self.inner.read().epoch
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        *self.inner.write() = snapshot;
    }
}
