//! Per-request actor context.

use agentbase_auth::Actor;

/// The resolved calling actor, injected by the auth middleware.
///
/// Immutable and present on every protected route. Handlers take it as an
/// explicit extension argument; there is no ambient current-actor anywhere
/// in the pipeline.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> Actor {
        self.actor
    }
}
