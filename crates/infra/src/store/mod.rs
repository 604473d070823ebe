//! Workspace store: the atomic unit behind every mutation.

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;
mod sweeper;
#[allow(clippy::module_inception)]
mod r#trait;

pub use in_memory::InMemoryWorkspaceStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresWorkspaceStore;
pub use sweeper::{spawn_idempotency_sweeper, SWEEP_INTERVAL};
pub use r#trait::{
    idempotency_ttl, receipt_data, Mutation, MutationOutcome, StoreError, WorkspaceStore,
    WriteOp,
};
