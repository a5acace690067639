//! Two-body (Keplerian) orbit math.

pub mod orbits;
pub mod propagator;

pub use orbits::Orbit;
pub use propagator::{KeplerPropagator, Propagated};
