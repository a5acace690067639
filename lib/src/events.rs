//! Outbound notifications for state changes made during a tick.

use serde::{Deserialize, Serialize};

use crate::bodies::BodyId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitEvent {
    Landed { body: BodyId, target: BodyId },
    TakenOff { body: BodyId },
    OrbitEstablished { body: BodyId },
    /// The body was re-based onto a new orbit target. Position and velocity
    /// are continuous across the patch; the elements are not.
    SoiTransition { body: BodyId, from: BodyId, to: BodyId },
    /// Two bodies came into contact. Fires once per contact.
    Collision { a: BodyId, b: BodyId },
}

impl OrbitEvent {
    /// The body whose state changed (the lower ID for collisions).
    pub fn body(&self) -> BodyId {
        match *self {
            OrbitEvent::Landed { body, .. }
            | OrbitEvent::TakenOff { body }
            | OrbitEvent::OrbitEstablished { body }
            | OrbitEvent::SoiTransition { body, .. } => body,
            OrbitEvent::Collision { a, .. } => a,
        }
    }
}

pub type Listener = Box<dyn FnMut(&OrbitEvent) + Send>;

/// Observer list plus a polling queue.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
    pending: Vec<OrbitEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&OrbitEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Deliver `event` to every listener and queue it for
    /// [`EventBus::drain`].
    pub fn emit(&mut self, event: OrbitEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
        self.pending.push(event);
    }

    pub fn drain(&mut self) -> Vec<OrbitEvent> {
        std::mem::take(&mut self.pending)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .field("pending", &self.pending)
            .finish()
    }
}
