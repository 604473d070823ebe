//! Mutation executor: the one path every state change goes through.
//!
//! Orchestration order is fixed: meter the actor, validate the command,
//! run the store's atomic unit under a bounded timeout, then notify live
//! viewers. The executor holds no state of its own and invents no locking;
//! atomicity belongs to the store, fan-out is best-effort after commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;

use agentbase_auth::Actor;
use agentbase_core::{
    Command, CommandError, EntityId, EntityKind, FieldMap, NamedCommand,
};
use agentbase_ledger::{ChangeNotice, EventDraft};

use crate::broadcast::WorkspaceBroadcaster;
use crate::rate_limit::{Decision, FixedWindowRateLimiter};
use crate::store::{receipt_data, Mutation, MutationOutcome, WorkspaceStore, WriteOp};

/// Default bound on one atomic-unit round trip.
pub const DEFAULT_APPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// What the caller gets back for a committed (or replayed) command.
///
/// `data` is the externally visible response body. For a replayed
/// idempotency key it is the stored snapshot, byte-identical to what the
/// original request returned.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReceipt {
    pub entity_id: EntityId,
    pub data: JsonValue,
    pub replayed: bool,
}

/// The command execution pipeline core.
pub struct MutationExecutor<S> {
    store: Arc<S>,
    limiter: Arc<FixedWindowRateLimiter>,
    broadcaster: Arc<WorkspaceBroadcaster>,
    apply_timeout: Duration,
}

impl<S> MutationExecutor<S>
where
    S: WorkspaceStore,
{
    pub fn new(
        store: Arc<S>,
        limiter: Arc<FixedWindowRateLimiter>,
        broadcaster: Arc<WorkspaceBroadcaster>,
    ) -> Self {
        Self {
            store,
            limiter,
            broadcaster,
            apply_timeout: DEFAULT_APPLY_TIMEOUT,
        }
    }

    pub fn with_apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// Execute one command for a resolved actor.
    ///
    /// The actor is an explicit argument on every call; nothing ambient.
    /// Its workspace id is the only tenancy input the store will see.
    #[tracing::instrument(
        skip(self, command),
        fields(actor_id = %actor.id, workspace_id = %actor.workspace_id),
        err
    )]
    pub async fn execute(
        &self,
        actor: Actor,
        command: Command,
    ) -> Result<CommandReceipt, CommandError> {
        // Metering comes first: a limited command opens no transaction and
        // leaves no ledger trace.
        if let Decision::Limited { retry_after } = self.limiter.allow(actor.id, Utc::now()) {
            return Err(CommandError::RateLimited {
                retry_after_secs: retry_after.as_secs(),
            });
        }

        let mutation = plan(actor, command)?;
        let entity_id = mutation.entity_id;

        let outcome = tokio::time::timeout(self.apply_timeout, self.store.apply(mutation))
            .await
            .map_err(|_| {
                CommandError::unavailable(
                    "storage timed out; outcome unknown, retry with the same idempotency key",
                )
            })?
            .map_err(CommandError::from)?;

        match outcome {
            MutationOutcome::Applied { entity, event } => {
                let data = receipt_data(&entity, &event);
                // Only other viewers need this; the caller already has its
                // answer in `data` and must not wait for the echo.
                self.broadcaster
                    .publish(ChangeNotice::from_committed(&entity, &event));
                Ok(CommandReceipt {
                    entity_id,
                    data,
                    replayed: false,
                })
            }
            MutationOutcome::Replayed { response } => {
                // The snapshot's entity id, not the re-planned one: a retry
                // of a create carries a fresh id that never materialized.
                let entity_id = response
                    .pointer("/entity/id")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or(entity_id);
                Ok(CommandReceipt {
                    entity_id,
                    data: response,
                    replayed: true,
                })
            }
        }
    }

    /// Ledger read path, scoped to the actor's workspace.
    pub async fn query_ledger(
        &self,
        actor: Actor,
        filter: &agentbase_ledger::LedgerFilter,
        page: agentbase_ledger::Page,
    ) -> Result<agentbase_ledger::LedgerPage, CommandError> {
        self.store
            .query_ledger(actor.workspace_id, filter, page)
            .await
            .map_err(CommandError::from)
    }
}

/// Turn a validated command into the mutation the store will apply.
///
/// Workspace scoping happens by construction: the mutation carries the
/// actor, and the store writes only to `actor.workspace_id`.
fn plan(actor: Actor, command: Command) -> Result<Mutation, CommandError> {
    match command {
        Command::Named {
            command,
            idempotency_key,
        } => {
            command.validate()?;
            let (entity_kind, entity_id, op, event) = match command {
                NamedCommand::CreateTask {
                    title,
                    status,
                    due_date,
                } => {
                    let mut fields = FieldMap::new();
                    fields.insert("title".to_string(), JsonValue::String(title));
                    fields.insert(
                        "status".to_string(),
                        JsonValue::String(status.unwrap_or_else(|| "todo".to_string())),
                    );
                    if let Some(due) = due_date {
                        fields.insert("due_date".to_string(), serde_json::json!(due));
                    }
                    created(EntityKind::Task, fields)
                }
                NamedCommand::CreateContact { name, email } => {
                    let mut fields = FieldMap::new();
                    fields.insert("name".to_string(), JsonValue::String(name));
                    if let Some(email) = email {
                        fields.insert("email".to_string(), JsonValue::String(email));
                    }
                    created(EntityKind::Contact, fields)
                }
                NamedCommand::CreateDeal { name, amount, stage } => {
                    let mut fields = FieldMap::new();
                    fields.insert("name".to_string(), JsonValue::String(name));
                    fields.insert(
                        "stage".to_string(),
                        JsonValue::String(stage.unwrap_or_else(|| "lead".to_string())),
                    );
                    if let Some(amount) = amount {
                        fields.insert("amount".to_string(), serde_json::json!(amount));
                    }
                    created(EntityKind::Deal, fields)
                }
                NamedCommand::AddNote { table, id, body } => {
                    let parent_kind = EntityKind::from_table_name(&table)?;
                    let mut fields = FieldMap::new();
                    fields.insert("body".to_string(), JsonValue::String(body));
                    fields.insert(
                        "parent_table".to_string(),
                        JsonValue::String(parent_kind.table_name().to_string()),
                    );
                    fields.insert("parent_id".to_string(), serde_json::json!(id));
                    created(EntityKind::Note, fields)
                }
                NamedCommand::ChangeStatus { table, id, status } => {
                    let kind = EntityKind::from_table_name(&table)?;
                    let mut fields = FieldMap::new();
                    fields.insert("status".to_string(), JsonValue::String(status));
                    (
                        kind,
                        id,
                        WriteOp::Patch { fields },
                        EventDraft::new(
                            kind.event_type("status_changed"),
                            serde_json::json!({ "field": "status" }),
                        )
                        .with_transition("status"),
                    )
                }
                NamedCommand::DeleteEntity { table, id } => {
                    let kind = EntityKind::from_table_name(&table)?;
                    (
                        kind,
                        id,
                        WriteOp::Delete,
                        EventDraft::new(kind.event_type("deleted"), serde_json::json!({})),
                    )
                }
            };

            Ok(Mutation {
                actor,
                entity_kind,
                entity_id,
                op,
                event,
                idempotency_key,
            })
        }
        Command::Patch(patch) => {
            // Protected fields fail the whole patch here, before any write.
            let kind = patch.validate()?;
            let changed: Vec<&String> = patch.fields.keys().collect();
            let event = EventDraft::new(
                kind.event_type("updated"),
                serde_json::json!({ "fields": changed }),
            );
            Ok(Mutation {
                actor,
                entity_kind: kind,
                entity_id: patch.id,
                op: WriteOp::Patch {
                    fields: patch.fields,
                },
                event,
                idempotency_key: patch.idempotency_key,
            })
        }
    }
}

fn created(kind: EntityKind, fields: FieldMap) -> (EntityKind, EntityId, WriteOp, EventDraft) {
    let event = EventDraft::new(
        kind.event_type("created"),
        serde_json::json!({ "fields": fields }),
    );
    (kind, EntityId::new(), WriteOp::Create { fields }, event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkspaceStore;
    use agentbase_core::{ActorId, ActorKind, FieldPatch, IdempotencyKey, WorkspaceId};
    use agentbase_ledger::LedgerFilter;
    use serde_json::json;

    fn pipeline() -> (Arc<InMemoryWorkspaceStore>, Arc<WorkspaceBroadcaster>, MutationExecutor<InMemoryWorkspaceStore>) {
        let store = Arc::new(InMemoryWorkspaceStore::new());
        let limiter = Arc::new(FixedWindowRateLimiter::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new());
        let executor = MutationExecutor::new(store.clone(), limiter, broadcaster.clone());
        (store, broadcaster, executor)
    }

    fn actor() -> Actor {
        Actor {
            id: ActorId::new(),
            kind: ActorKind::Agent,
            workspace_id: WorkspaceId::new(),
        }
    }

    fn create_task(key: Option<&str>) -> Command {
        Command::Named {
            command: NamedCommand::CreateTask {
                title: "x".to_string(),
                status: None,
                due_date: None,
            },
            idempotency_key: key.map(|k| IdempotencyKey::try_from(k.to_string()).unwrap()),
        }
    }

    #[tokio::test]
    async fn same_key_twice_yields_one_event_and_identical_data() {
        let (_store, _hub, executor) = pipeline();
        let actor = actor();

        let first = executor.execute(actor, create_task(Some("k1"))).await.unwrap();
        let second = executor.execute(actor, create_task(Some("k1"))).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(
            serde_json::to_string(&first.data).unwrap(),
            serde_json::to_string(&second.data).unwrap()
        );

        let page = executor
            .query_ledger(actor, &LedgerFilter::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn protected_patch_is_rejected_with_zero_ledger_events() {
        let (_store, _hub, executor) = pipeline();
        let actor = actor();

        let created = executor.execute(actor, create_task(None)).await.unwrap();
        let patch = Command::Patch(FieldPatch {
            table: "tasks".to_string(),
            id: created.entity_id,
            fields: [("ticket_number".to_string(), json!(999))].into_iter().collect(),
            idempotency_key: None,
        });

        let err = executor.execute(actor, patch).await.unwrap_err();
        assert_eq!(err.kind(), "protected_field");

        let page = executor
            .query_ledger(actor, &LedgerFilter::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1, "only the create may be ledgered");
    }

    #[tokio::test]
    async fn excess_commands_are_limited_and_accepted_ones_complete() {
        let store = Arc::new(InMemoryWorkspaceStore::new());
        let limiter = Arc::new(FixedWindowRateLimiter::new(3, Duration::from_secs(60)));
        let broadcaster = Arc::new(WorkspaceBroadcaster::new());
        let executor = MutationExecutor::new(store, limiter, broadcaster);
        let actor = actor();

        let mut accepted = 0;
        let mut limited = 0;
        for _ in 0..5 {
            match executor.execute(actor, create_task(None)).await {
                Ok(_) => accepted += 1,
                Err(CommandError::RateLimited { retry_after_secs }) => {
                    assert!(retry_after_secs > 0);
                    limited += 1;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((accepted, limited), (3, 2));

        let page = executor
            .query_ledger(actor, &LedgerFilter::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3, "accepted commands completed in full");
    }

    #[tokio::test]
    async fn cross_workspace_target_reads_as_not_found() {
        let (_store, _hub, executor) = pipeline();
        let owner = actor();
        let outsider = actor();

        let created = executor.execute(owner, create_task(None)).await.unwrap();
        let patch = Command::Patch(FieldPatch {
            table: "tasks".to_string(),
            id: created.entity_id,
            fields: [("title".to_string(), json!("theirs"))].into_iter().collect(),
            idempotency_key: None,
        });

        let err = executor.execute(outsider, patch).await.unwrap_err();
        assert_eq!(err, CommandError::NotFound);
    }

    #[tokio::test]
    async fn committed_mutations_reach_workspace_subscribers_only() {
        let (_store, hub, executor) = pipeline();
        let actor = actor();
        let stranger = WorkspaceId::new();

        let mut rx = hub.subscribe(actor.workspace_id);
        let mut stranger_rx = hub.subscribe(stranger);

        let receipt = executor.execute(actor, create_task(None)).await.unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.entity_id, receipt.entity_id);
        assert_eq!(notice.event_type, "task.created");
        assert!(stranger_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replayed_commands_are_not_rebroadcast() {
        let (_store, hub, executor) = pipeline();
        let actor = actor();

        executor.execute(actor, create_task(Some("k1"))).await.unwrap();
        let mut rx = hub.subscribe(actor.workspace_id);
        executor.execute(actor, create_task(Some("k1"))).await.unwrap();

        assert!(rx.try_recv().is_err(), "replay must not echo again");
    }

    #[tokio::test]
    async fn injected_append_failure_is_retryable_and_leaves_no_state() {
        let (store, _hub, executor) = pipeline();
        let actor = actor();

        store.fail_next_ledger_append();
        let err = executor.execute(actor, create_task(Some("k1"))).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
        assert!(err.retryable());

        let page = executor
            .query_ledger(actor, &LedgerFilter::default(), Default::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        // The same key retries cleanly.
        let receipt = executor.execute(actor, create_task(Some("k1"))).await.unwrap();
        assert!(!receipt.replayed);
    }
}
