//! Realtime change payload pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use agentbase_core::{EntityId, EntityKind, EntityState, WorkspaceId};

use crate::event::ActivityEvent;

/// What subscribers receive after a mutation commits: the entity snapshot
/// and the ledger event in one message, so viewers need not re-query for
/// either.
///
/// Delivery is best-effort and at-least-once. A subscriber that reconnects
/// after a gap re-fetches current state rather than assuming it saw every
/// intermediate notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub workspace_id: WorkspaceId,
    pub entity_kind: EntityKind,
    pub entity_id: EntityId,
    pub event_type: String,
    /// Post-mutation snapshot of the entity row.
    pub entity: JsonValue,
    pub event: ActivityEvent,
    /// Commit time; the reconciler's staleness comparison runs on this.
    pub recorded_at: DateTime<Utc>,
}

impl ChangeNotice {
    pub fn from_committed(entity: &EntityState, event: &ActivityEvent) -> Self {
        Self {
            workspace_id: event.workspace_id(),
            entity_kind: event.entity_kind(),
            entity_id: event.entity_id(),
            event_type: event.event_type().to_string(),
            entity: entity.to_json(),
            event: event.clone(),
            recorded_at: event.recorded_at(),
        }
    }
}
