//! Activity event: the immutable record of one completed mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use agentbase_core::{ActorId, ActorKind, EntityId, EntityKind, WorkspaceId};

/// One immutable ledger record.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `workspace_id`, which is always
///   derived server-side from the resolved actor.
/// - **Append-only**: `seq` is monotonically increasing per entity; within
///   one entity the ledger renders as a strictly increasing timeline.
/// - `actor_id` is never null: there is no anonymous or system actor.
///
/// Fields are private behind getters. Records are constructed exactly once,
/// inside the store's atomic unit, and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    id: Uuid,
    workspace_id: WorkspaceId,

    entity_kind: EntityKind,
    entity_id: EntityId,

    actor_id: ActorId,
    actor_kind: ActorKind,

    /// Stable event name, e.g. `task.created`, `deal.status_changed`.
    event_type: String,

    /// Semantic description of the change. Field transitions carry both the
    /// old and the new value.
    payload: JsonValue,

    /// Monotonically increasing position within this entity's history.
    seq: u64,

    recorded_at: DateTime<Utc>,
}

impl ActivityEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        workspace_id: WorkspaceId,
        entity_kind: EntityKind,
        entity_id: EntityId,
        actor_id: ActorId,
        actor_kind: ActorKind,
        event_type: impl Into<String>,
        payload: JsonValue,
        seq: u64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            workspace_id,
            entity_kind,
            entity_id,
            actor_id,
            actor_kind,
            event_type: event_type.into(),
            payload,
            seq,
            recorded_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.entity_kind
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn actor_kind(&self) -> ActorKind {
        self.actor_kind
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// External JSON shape, as served by the ledger query endpoint.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id,
            "entity_kind": self.entity_kind,
            "entity_id": self.entity_id,
            "actor_id": self.actor_id,
            "actor_kind": self.actor_kind,
            "event_type": self.event_type,
            "payload": self.payload,
            "seq": self.seq,
            "recorded_at": self.recorded_at,
        })
    }
}

/// What the executor hands the store: an event not yet assigned identity,
/// sequence, or timestamp. Those are fixed inside the atomic unit so that a
/// rolled-back mutation leaves no trace of them.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: String,

    /// Base payload; the store merges in `{from, to}` when the mutation
    /// declares a transition field.
    pub payload: JsonValue,

    /// Field whose old and new value must be recorded in the payload
    /// (status transitions).
    pub transition_of: Option<String>,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            transition_of: None,
        }
    }

    pub fn with_transition(mut self, field: impl Into<String>) -> Self {
        self.transition_of = Some(field.into());
        self
    }
}
