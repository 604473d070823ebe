//! `agentbase-auth` — actor resolution boundary (zero-trust).
//!
//! Turns an inbound opaque credential into `(actor_id, actor_kind,
//! workspace_id)`. Verification is delegated to an external identity
//! authority behind a trait so revocation there is immediate here; nothing
//! in this crate decodes a trusted secret locally, and nothing in the
//! request payload is ever believed about identity.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod authority;
pub mod credential;
pub mod directory;
pub mod error;
pub mod resolver;

pub use authority::{IdentityAuthority, StaticAuthority, VerifiedIdentity};
pub use credential::Credential;
pub use directory::{AgentBinding, Directory, StaticDirectory};
pub use error::AuthError;
pub use resolver::{Actor, ActorResolver};
