#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::similar_names,
    clippy::doc_markdown
)]
//! Orbital mechanics for a simulated universe: a registry of bodies on
//! Kepler rails or in free flight, spheres of influence, transfer planning
//! and a fixed-step simulation loop.

pub mod arena;
pub mod bodies;
pub mod config;
pub mod error;
pub mod events;
pub mod generation;
pub mod gravity;
pub mod kepler;
pub mod maneuver;
pub mod manager;
pub mod persistence;
pub mod soi;
pub mod spatial;
pub mod time;
pub mod transfer;

pub use self::{
    bodies::{BodyId, BodyKind, OrbitMode, OrbitalBody},
    config::SimConfig,
    error::{OrbitError, Result},
    events::OrbitEvent,
    gravity::{GravityMode, GravityModel},
    kepler::Orbit,
    manager::OrbitalMechanics,
};
