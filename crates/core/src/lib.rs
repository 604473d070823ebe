//! `agentbase-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the closed entity registry, the command model,
//! and the pipeline error taxonomy.

pub mod command;
pub mod entity;
pub mod error;
pub mod id;
pub mod registry;

pub use command::{Command, FieldPatch, IdempotencyKey, NamedCommand};
pub use entity::{EntityKind, EntityState, FieldMap};
pub use error::{CommandError, CommandResult};
pub use id::{ActorId, ActorKind, EntityId, WorkspaceId};
