//! In-memory workspace store.
//!
//! Intended for tests/dev. One mutex per workspace shard: the atomic unit
//! is the critical section, so unrelated workspaces never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use agentbase_core::{EntityId, EntityKind, EntityState, WorkspaceId};
use agentbase_ledger::{ActivityEvent, LedgerFilter, LedgerPage, Page};

use super::r#trait::{
    receipt_data, Mutation, MutationOutcome, StoreError, WorkspaceStore, WriteOp,
};

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    response: JsonValue,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Shard {
    entities: HashMap<(EntityKind, EntityId), EntityState>,
    ledger: Vec<ActivityEvent>,
    entity_seq: HashMap<EntityId, u64>,
    idempotency: HashMap<String, IdempotencyRecord>,
    /// Per-workspace counters backing server-assigned sequence fields
    /// (task ticket numbers, deal numbers).
    counters: HashMap<&'static str, u64>,
}

/// In-memory `WorkspaceStore`.
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceStore {
    shards: DashMap<WorkspaceId, Arc<Mutex<Shard>>>,
    /// Which workspace owns each entity id. Lets `apply` distinguish a
    /// cross-workspace reference from a truly absent row for logging; the
    /// external answer is the same either way.
    entity_owner: DashMap<EntityId, WorkspaceId>,
    fail_next_append: AtomicBool,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault injection: make the next ledger append fail after the entity
    /// change has been computed, proving the unit rolls back as a whole.
    /// Test hook; no production caller.
    pub fn fail_next_ledger_append(&self) {
        self.fail_next_append.store(true, Ordering::SeqCst);
    }

    fn shard(&self, workspace_id: WorkspaceId) -> Arc<Mutex<Shard>> {
        self.shards
            .entry(workspace_id)
            .or_default()
            .clone()
    }

    fn lock(shard: &Arc<Mutex<Shard>>) -> Result<std::sync::MutexGuard<'_, Shard>, StoreError> {
        shard
            .lock()
            .map_err(|_| StoreError::Storage("workspace shard poisoned".to_string()))
    }

    fn missing_entity_error(&self, workspace_id: WorkspaceId, id: EntityId) -> StoreError {
        match self.entity_owner.get(&id) {
            Some(owner) if *owner != workspace_id => StoreError::ForeignWorkspace,
            _ => StoreError::NotFound,
        }
    }
}

/// Sequence field assigned at create time, per kind.
fn sequence_field(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Task => Some("ticket_number"),
        EntityKind::Deal => Some("deal_number"),
        _ => None,
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn apply(&self, mutation: Mutation) -> Result<MutationOutcome, StoreError> {
        let workspace_id = mutation.actor.workspace_id;
        let shard = self.shard(workspace_id);
        let mut shard = Self::lock(&shard)?;

        // Replay check first, inside the same critical section as the
        // mutation. The shard lock is the atomic unit here, so a retry can
        // never land between check and write.
        if let Some(key) = &mutation.idempotency_key {
            if let Some(record) = shard.idempotency.get(key.as_str()) {
                return Ok(MutationOutcome::Replayed {
                    response: record.response.clone(),
                });
            }
        }

        let now = Utc::now();
        let entity_key = (mutation.entity_kind, mutation.entity_id);

        // Compute the post-mutation row without touching the shard yet.
        let (entity, old_transition_value) = match &mutation.op {
            WriteOp::Create { fields } => {
                if shard.entities.contains_key(&entity_key) {
                    return Err(StoreError::AlreadyExists);
                }
                let mut fields = fields.clone();
                if let Some(counter) = sequence_field(mutation.entity_kind) {
                    let next = shard.counters.entry(counter).or_insert(0);
                    *next += 1;
                    fields.insert(counter.to_string(), JsonValue::from(*next));
                }
                (
                    EntityState {
                        kind: mutation.entity_kind,
                        id: mutation.entity_id,
                        workspace_id,
                        fields,
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                    },
                    None,
                )
            }
            WriteOp::Patch { fields } => {
                let current = shard
                    .entities
                    .get(&entity_key)
                    .filter(|e| e.deleted_at.is_none())
                    .ok_or_else(|| self.missing_entity_error(workspace_id, mutation.entity_id))?;

                let old = mutation
                    .event
                    .transition_of
                    .as_deref()
                    .map(|f| current.fields.get(f).cloned().unwrap_or(JsonValue::Null));

                let mut next = current.clone();
                for (field, value) in fields {
                    next.fields.insert(field.clone(), value.clone());
                }
                next.updated_at = now;
                (next, old)
            }
            WriteOp::Delete => {
                let current = shard
                    .entities
                    .get(&entity_key)
                    .filter(|e| e.deleted_at.is_none())
                    .ok_or_else(|| self.missing_entity_error(workspace_id, mutation.entity_id))?;

                let mut next = current.clone();
                next.updated_at = now;
                next.deleted_at = Some(now);
                (next, None)
            }
        };

        let seq = shard.entity_seq.get(&mutation.entity_id).copied().unwrap_or(0) + 1;

        let mut payload = mutation.event.payload.clone();
        if let Some(field) = &mutation.event.transition_of {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert(
                    "from".to_string(),
                    old_transition_value.unwrap_or(JsonValue::Null),
                );
                obj.insert(
                    "to".to_string(),
                    entity.fields.get(field).cloned().unwrap_or(JsonValue::Null),
                );
            }
        }

        let event = ActivityEvent::new(
            Uuid::now_v7(),
            workspace_id,
            mutation.entity_kind,
            mutation.entity_id,
            mutation.actor.id,
            mutation.actor.kind,
            mutation.event.event_type.clone(),
            payload,
            seq,
            now,
        );

        if self.fail_next_append.swap(false, Ordering::SeqCst) {
            // Nothing has been written; the computed state is discarded and
            // the caller sees a retryable failure.
            return Err(StoreError::AppendFailed(
                "ledger append failed (injected)".to_string(),
            ));
        }

        // Commit point: entity write, ledger append, and idempotency
        // record land together under the shard lock.
        shard.entities.insert(entity_key, entity.clone());
        shard.ledger.push(event.clone());
        shard.entity_seq.insert(mutation.entity_id, seq);
        self.entity_owner.insert(mutation.entity_id, workspace_id);
        if let Some(key) = &mutation.idempotency_key {
            shard.idempotency.insert(
                key.as_str().to_string(),
                IdempotencyRecord {
                    response: receipt_data(&entity, &event),
                    created_at: now,
                },
            );
        }

        Ok(MutationOutcome::Applied { entity, event })
    }

    async fn query_ledger(
        &self,
        workspace_id: WorkspaceId,
        filter: &LedgerFilter,
        page: Page,
    ) -> Result<LedgerPage, StoreError> {
        let shard = self.shard(workspace_id);
        let shard = Self::lock(&shard)?;

        // The ledger vec is already in global creation order; per-entity
        // order additionally holds by seq since appends are serialized.
        let matched: Vec<&ActivityEvent> =
            shard.ledger.iter().filter(|e| filter.matches(e)).collect();
        let total = matched.len() as u64;
        let events: Vec<ActivityEvent> = matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        let has_more = total > (page.offset + page.limit) as u64;

        Ok(LedgerPage {
            events,
            total,
            page,
            has_more,
        })
    }

    async fn get_entity(
        &self,
        workspace_id: WorkspaceId,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<EntityState>, StoreError> {
        let shard = self.shard(workspace_id);
        let shard = Self::lock(&shard)?;
        Ok(shard.entities.get(&(kind, id)).cloned())
    }

    async fn sweep_idempotency(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for entry in self.shards.iter() {
            let mut shard = Self::lock(entry.value())?;
            let before = shard.idempotency.len();
            shard.idempotency.retain(|_, r| r.created_at >= older_than);
            removed += (before - shard.idempotency.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbase_auth::Actor;
    use agentbase_core::{ActorId, ActorKind, CommandError, IdempotencyKey};
    use agentbase_ledger::EventDraft;
    use serde_json::json;

    fn actor(workspace_id: WorkspaceId) -> Actor {
        Actor {
            id: ActorId::new(),
            kind: ActorKind::Agent,
            workspace_id,
        }
    }

    fn create_task(actor: Actor, key: Option<&str>) -> Mutation {
        let fields: agentbase_core::FieldMap =
            [("title".to_string(), json!("x"))].into_iter().collect();
        Mutation {
            actor,
            entity_kind: EntityKind::Task,
            entity_id: EntityId::new(),
            op: WriteOp::Create {
                fields: fields.clone(),
            },
            event: EventDraft::new("task.created", json!({ "fields": fields })),
            idempotency_key: key.map(|k| IdempotencyKey::try_from(k.to_string()).unwrap()),
        }
    }

    #[tokio::test]
    async fn retried_key_replays_without_reexecuting() {
        let store = InMemoryWorkspaceStore::new();
        let actor = actor(WorkspaceId::new());
        let mutation = create_task(actor, Some("k1"));

        let first = store.apply(mutation.clone()).await.unwrap();
        let MutationOutcome::Applied { entity, event } = &first else {
            panic!("first apply must execute");
        };
        let original = receipt_data(entity, event);

        // Retry with the same key but a different entity id, as a client
        // that regenerated the request after a timeout would.
        let mut retry = create_task(actor, Some("k1"));
        retry.entity_id = EntityId::new();
        let second = store.apply(retry).await.unwrap();
        let MutationOutcome::Replayed { response } = second else {
            panic!("second apply must replay");
        };
        assert_eq!(response, original);

        let page = store
            .query_ledger(actor.workspace_id, &LedgerFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn failed_append_rolls_back_the_entity_write() {
        let store = InMemoryWorkspaceStore::new();
        let actor = actor(WorkspaceId::new());
        let mutation = create_task(actor, Some("k1"));
        let id = mutation.entity_id;

        store.fail_next_ledger_append();
        let err = store.apply(mutation.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::AppendFailed(_)));

        assert!(store
            .get_entity(actor.workspace_id, EntityKind::Task, id)
            .await
            .unwrap()
            .is_none());
        let page = store
            .query_ledger(actor.workspace_id, &LedgerFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        // The key was not burned either; the retry executes.
        let retry = store.apply(mutation).await.unwrap();
        assert!(matches!(retry, MutationOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn cross_workspace_patch_reads_as_not_found() {
        let store = InMemoryWorkspaceStore::new();
        let owner = actor(WorkspaceId::new());
        let outsider = actor(WorkspaceId::new());

        let created = store.apply(create_task(owner, None)).await.unwrap();
        let MutationOutcome::Applied { entity, .. } = created else {
            unreachable!()
        };

        let patch = Mutation {
            actor: outsider,
            entity_kind: EntityKind::Task,
            entity_id: entity.id,
            op: WriteOp::Patch {
                fields: [("title".to_string(), json!("stolen"))].into_iter().collect(),
            },
            event: EventDraft::new("task.updated", json!({})),
            idempotency_key: None,
        };
        let err = store.apply(patch).await.unwrap_err();
        assert_eq!(err, StoreError::ForeignWorkspace);
        // The external view collapses to plain not-found.
        assert_eq!(CommandError::from(err), CommandError::NotFound);

        // And the row is untouched for its owner.
        let row = store
            .get_entity(owner.workspace_id, EntityKind::Task, entity.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.fields.get("title"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn ticket_numbers_are_assigned_per_workspace() {
        let store = InMemoryWorkspaceStore::new();
        let a = actor(WorkspaceId::new());
        let b = actor(WorkspaceId::new());

        for expected in 1..=2u64 {
            let MutationOutcome::Applied { entity, .. } =
                store.apply(create_task(a, None)).await.unwrap()
            else {
                unreachable!()
            };
            assert_eq!(entity.fields.get("ticket_number"), Some(&json!(expected)));
        }
        let MutationOutcome::Applied { entity, .. } =
            store.apply(create_task(b, None)).await.unwrap()
        else {
            unreachable!()
        };
        assert_eq!(entity.fields.get("ticket_number"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn status_transition_records_old_and_new() {
        let store = InMemoryWorkspaceStore::new();
        let actor = actor(WorkspaceId::new());

        let mut create = create_task(actor, None);
        if let WriteOp::Create { fields } = &mut create.op {
            fields.insert("status".to_string(), json!("todo"));
        }
        let MutationOutcome::Applied { entity, .. } = store.apply(create).await.unwrap() else {
            unreachable!()
        };

        let change = Mutation {
            actor,
            entity_kind: EntityKind::Task,
            entity_id: entity.id,
            op: WriteOp::Patch {
                fields: [("status".to_string(), json!("done"))].into_iter().collect(),
            },
            event: EventDraft::new("task.status_changed", json!({ "field": "status" }))
                .with_transition("status"),
            idempotency_key: None,
        };
        let MutationOutcome::Applied { event, .. } = store.apply(change).await.unwrap() else {
            unreachable!()
        };
        assert_eq!(event.payload()["from"], json!("todo"));
        assert_eq!(event.payload()["to"], json!("done"));
        assert_eq!(event.seq(), 2);
    }

    #[tokio::test]
    async fn delete_is_soft_and_terminal() {
        let store = InMemoryWorkspaceStore::new();
        let actor = actor(WorkspaceId::new());
        let MutationOutcome::Applied { entity, .. } =
            store.apply(create_task(actor, None)).await.unwrap()
        else {
            unreachable!()
        };

        let delete = Mutation {
            actor,
            entity_kind: EntityKind::Task,
            entity_id: entity.id,
            op: WriteOp::Delete,
            event: EventDraft::new("task.deleted", json!({})),
            idempotency_key: None,
        };
        store.apply(delete.clone()).await.unwrap();

        let row = store
            .get_entity(actor.workspace_id, EntityKind::Task, entity.id)
            .await
            .unwrap()
            .unwrap();
        assert!(row.deleted_at.is_some());

        // A second delete no longer sees the row.
        assert_eq!(store.apply(delete).await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn sweep_honors_the_retention_boundary() {
        let store = InMemoryWorkspaceStore::new();
        let actor = actor(WorkspaceId::new());
        store.apply(create_task(actor, Some("k1"))).await.unwrap();

        // A sweep at a cutoff in the past removes nothing.
        let removed = store
            .sweep_idempotency(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // Replay still short-circuits.
        let retry = store.apply(create_task(actor, Some("k1"))).await.unwrap();
        assert!(matches!(retry, MutationOutcome::Replayed { .. }));

        // A cutoff after the record's creation removes it.
        let removed = store
            .sweep_idempotency(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
