//! The `WorkspaceStore` contract.
//!
//! One call, `apply()`, performs the whole indivisible unit: idempotency
//! check-and-reserve, entity write, ledger append, idempotency commit.
//! Either everything persists or nothing does. The trait exposes no
//! standalone event append and no event update or delete of any shape, so
//! ledger immutability is structural: history can only ever grow, and only
//! as a side effect of a committed mutation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use agentbase_auth::Actor;
use agentbase_core::{CommandError, EntityId, EntityKind, EntityState, FieldMap, IdempotencyKey, WorkspaceId};
use agentbase_ledger::{ActivityEvent, EventDraft, LedgerFilter, LedgerPage, Page};

/// How long an idempotency record is retained. Records must never be
/// evicted earlier: early eviction reopens the double-apply window.
pub fn idempotency_ttl() -> Duration {
    Duration::hours(24)
}

/// The entity half of one mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create { fields: FieldMap },
    Patch { fields: FieldMap },
    Delete,
}

/// One fully validated mutation, ready for the atomic unit.
///
/// `actor.workspace_id` is the only workspace the store will touch; it was
/// resolved server-side and no caller input can override it.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub actor: Actor,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub op: WriteOp,
    pub event: EventDraft,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Result of one `apply()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The mutation committed; entity write and ledger append are both
    /// durable.
    Applied {
        entity: EntityState,
        event: ActivityEvent,
    },
    /// The idempotency key had been seen before. The stored response is
    /// returned verbatim; nothing was executed.
    Replayed { response: JsonValue },
}

/// Store-level failures.
///
/// `NotFound` and `ForeignWorkspace` are distinct here so logs can tell an
/// absent row from a cross-tenant probe; the boundary collapses both into
/// one external `NotFound`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("entity belongs to another workspace")]
    ForeignWorkspace,

    #[error("entity already exists")]
    AlreadyExists,

    #[error("idempotency key is being executed by another request")]
    ReservationInFlight,

    #[error("ledger append failed: {0}")]
    AppendFailed(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for CommandError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => CommandError::NotFound,
            StoreError::ForeignWorkspace => {
                // Existence must not leak across the tenant boundary.
                tracing::warn!("cross-workspace entity reference rejected");
                CommandError::NotFound
            }
            StoreError::AlreadyExists => CommandError::conflict("entity already exists"),
            StoreError::ReservationInFlight => {
                CommandError::conflict("a request with this idempotency key is still in flight")
            }
            StoreError::AppendFailed(msg) => CommandError::unavailable(msg),
            StoreError::Conflict(msg) => CommandError::conflict(msg),
            StoreError::Storage(msg) => CommandError::unavailable(msg),
        }
    }
}

/// Canonical response `data` JSON for a committed mutation.
///
/// Both the fresh path and the idempotency snapshot go through this one
/// function, which is what makes a replayed response byte-identical to the
/// original: `serde_json` maps are ordered, so serialization is stable.
pub fn receipt_data(entity: &EntityState, event: &ActivityEvent) -> JsonValue {
    serde_json::json!({
        "entity": entity.to_json(),
        "event": event.to_json(),
    })
}

/// Durable workspace state plus its activity ledger, behind one
/// transactional boundary.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Apply one mutation as an indivisible unit.
    ///
    /// When `mutation.idempotency_key` is present, the key is checked and
    /// reserved inside the same unit; a replayed key short-circuits with
    /// the stored response and executes nothing.
    async fn apply(&self, mutation: Mutation) -> Result<MutationOutcome, StoreError>;

    /// Query ledger history, always scoped to one workspace.
    ///
    /// Within one entity, results are strictly ordered by `(recorded_at,
    /// seq)`; across entities only global creation-time order holds.
    async fn query_ledger(
        &self,
        workspace_id: WorkspaceId,
        filter: &LedgerFilter,
        page: Page,
    ) -> Result<LedgerPage, StoreError>;

    /// Fetch one entity row as visible from `workspace_id`.
    async fn get_entity(
        &self,
        workspace_id: WorkspaceId,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<EntityState>, StoreError>;

    /// Delete idempotency records created strictly before `older_than`.
    /// Returns how many were removed. Liveness only; correctness needs
    /// records kept for their full TTL.
    async fn sweep_idempotency(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
