//! `agentbase-client` — caller-side collaborators.
//!
//! Code that runs inside a viewer (browser shell, desktop client, agent
//! runtime), not on the server. Currently the optimistic reconciler: the
//! contract every optimistically-updating caller must satisfy so broadcast
//! echoes never double-apply or regress local state.

pub mod reconciler;

pub use reconciler::{EchoDisposition, OptimisticReconciler};
