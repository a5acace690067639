//! Error types for the orbital core.

use thiserror::Error;

use crate::bodies::{BodyId, OrbitMode};

/// Errors reported by registry, state-machine and planning operations.
///
/// None of these are fatal to the simulation: a failed call leaves every
/// body exactly as it was.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrbitError {
    /// The ID does not refer to a registered body.
    #[error("body {0} is not registered")]
    UnknownBody(BodyId),

    /// The body already carries an ID that is present in the registry.
    #[error("body {0} is already registered")]
    AlreadyRegistered(BodyId),

    /// Physical parameters are unusable (non-positive mass or radius, NaN
    /// state, ...).
    #[error("invalid body {name:?}: {reason}")]
    InvalidBody { name: String, reason: String },

    /// Elliptical-only math was fed a degenerate orbit.
    #[error("degenerate orbit for body {body}: {reason}")]
    DegenerateOrbit { body: BodyId, reason: String },

    /// Hohmann transfers need both bodies orbiting the same primary.
    #[error("bodies {from} and {to} do not share an orbit target")]
    NoCommonPrimary { from: BodyId, to: BodyId },

    /// Re-targeting would make a body orbit itself, directly or
    /// transitively.
    #[error("body {body} cannot orbit {target}: the orbit chain would contain a cycle")]
    OrbitCycle { body: BodyId, target: BodyId },

    /// The requested operation is not a valid transition from the body's
    /// current mode.
    #[error("body {body} cannot {operation} while in mode {mode:?}")]
    InvalidTransition {
        body: BodyId,
        mode: OrbitMode,
        operation: &'static str,
    },

    /// The transfer-window search found no phase match in its horizon.
    #[error("no transfer window from {from} to {to}: {reason}")]
    NoTransferWindow {
        from: BodyId,
        to: BodyId,
        reason: String,
    },

    /// A saved or queued state violates a registry invariant.
    #[error("invalid orbital state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, OrbitError>;
