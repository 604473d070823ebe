//! Postgres-backed workspace store.
//!
//! One SQL transaction is the atomic unit: idempotency reservation, entity
//! write, ledger append, and idempotency commit either all land or all roll
//! back. Every statement filters by `workspace_id`, so cross-tenant access
//! is impossible at the query level, not merely by convention.
//!
//! ## Error Mapping
//!
//! | PostgreSQL error code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` unique violation | `Conflict` | Concurrent append to the same entity stream, or entity id collision |
//! | other database errors | `Storage` | Network failures, pool exhaustion, constraint issues |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use agentbase_core::{ActorId, ActorKind, EntityId, EntityKind, EntityState, FieldMap, WorkspaceId};
use agentbase_ledger::{ActivityEvent, LedgerFilter, LedgerPage, Page};

use super::r#trait::{
    receipt_data, Mutation, MutationOutcome, StoreError, WorkspaceStore, WriteOp,
};

/// Postgres `WorkspaceStore`.
///
/// Cheap to clone; the sqlx pool handles connection management and is safe
/// to share across tasks.
#[derive(Debug, Clone)]
pub struct PostgresWorkspaceStore {
    pool: Arc<PgPool>,
}

impl PostgresWorkspaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the backing tables when they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                workspace_id  UUID        NOT NULL,
                kind          TEXT        NOT NULL,
                id            UUID        NOT NULL,
                fields        JSONB       NOT NULL,
                created_at    TIMESTAMPTZ NOT NULL,
                updated_at    TIMESTAMPTZ NOT NULL,
                deleted_at    TIMESTAMPTZ NULL,
                PRIMARY KEY (workspace_id, kind, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS activity_events (
                id            UUID        PRIMARY KEY,
                workspace_id  UUID        NOT NULL,
                entity_kind   TEXT        NOT NULL,
                entity_id     UUID        NOT NULL,
                actor_id      UUID        NOT NULL,
                actor_kind    TEXT        NOT NULL,
                event_type    TEXT        NOT NULL,
                payload       JSONB       NOT NULL,
                seq           BIGINT      NOT NULL CHECK (seq > 0),
                recorded_at   TIMESTAMPTZ NOT NULL,
                UNIQUE (workspace_id, entity_id, seq)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                workspace_id  UUID        NOT NULL,
                key           TEXT        NOT NULL,
                response      JSONB       NULL,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (workspace_id, key)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workspace_counters (
                workspace_id  UUID   NOT NULL,
                counter       TEXT   NOT NULL,
                next          BIGINT NOT NULL,
                PRIMARY KEY (workspace_id, counter)
            )
            "#,
        ] {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn load_entity_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: WorkspaceId,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<EntityState, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT fields, created_at, updated_at, deleted_at
            FROM entities
            WHERE workspace_id = $1 AND kind = $2 AND id = $3 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(kind.table_name())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_entity", e))?;

        let Some(row) = row else {
            // Distinguish a cross-workspace reference from an absent row
            // for logging only; callers see the same external answer.
            let elsewhere: Option<Uuid> = sqlx::query(
                "SELECT workspace_id FROM entities WHERE kind = $1 AND id = $2 LIMIT 1",
            )
            .bind(kind.table_name())
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("load_entity_owner", e))?
            .map(|r| r.get("workspace_id"));

            return Err(match elsewhere {
                Some(owner) if owner != *workspace_id.as_uuid() => StoreError::ForeignWorkspace,
                _ => StoreError::NotFound,
            });
        };

        let fields: JsonValue = row.get("fields");
        let fields = fields
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::Storage("entity fields are not an object".to_string()))?;

        Ok(EntityState {
            kind,
            id,
            workspace_id,
            fields,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    async fn next_counter(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: WorkspaceId,
        counter: &str,
    ) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO workspace_counters (workspace_id, counter, next)
            VALUES ($1, $2, 1)
            ON CONFLICT (workspace_id, counter)
            DO UPDATE SET next = workspace_counters.next + 1
            RETURNING next
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(counter)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("next_counter", e))?;
        Ok(row.get("next"))
    }
}

fn sequence_field(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Task => Some("ticket_number"),
        EntityKind::Deal => Some("deal_number"),
        _ => None,
    }
}

#[async_trait]
impl WorkspaceStore for PostgresWorkspaceStore {
    #[instrument(
        skip(self, mutation),
        fields(
            workspace_id = %mutation.actor.workspace_id,
            entity_kind = %mutation.entity_kind,
            entity_id = %mutation.entity_id,
            event_type = %mutation.event.event_type,
        ),
        err
    )]
    async fn apply(&self, mutation: Mutation) -> Result<MutationOutcome, StoreError> {
        let workspace_id = mutation.actor.workspace_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Reserve the key inside the transaction. A duplicate insert waits
        // on the first writer's commit, then conflicts, so the replay read
        // below always sees the committed response.
        if let Some(key) = &mutation.idempotency_key {
            let reserved = sqlx::query(
                r#"
                INSERT INTO idempotency_keys (workspace_id, key, response)
                VALUES ($1, $2, NULL)
                ON CONFLICT (workspace_id, key) DO NOTHING
                "#,
            )
            .bind(workspace_id.as_uuid())
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("reserve_key", e))?;

            if reserved.rows_affected() == 0 {
                let row = sqlx::query(
                    "SELECT response FROM idempotency_keys WHERE workspace_id = $1 AND key = $2",
                )
                .bind(workspace_id.as_uuid())
                .bind(key.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_key", e))?;

                let response: Option<JsonValue> = row.get("response");
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return match response {
                    Some(response) => Ok(MutationOutcome::Replayed { response }),
                    None => Err(StoreError::ReservationInFlight),
                };
            }
        }

        let now = Utc::now();
        let (entity, old_transition_value) = match &mutation.op {
            WriteOp::Create { fields } => {
                let mut fields = fields.clone();
                if let Some(counter) = sequence_field(mutation.entity_kind) {
                    let next = self.next_counter(&mut tx, workspace_id, counter).await?;
                    fields.insert(counter.to_string(), JsonValue::from(next));
                }

                let inserted = sqlx::query(
                    r#"
                    INSERT INTO entities (workspace_id, kind, id, fields, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $5)
                    ON CONFLICT (workspace_id, kind, id) DO NOTHING
                    "#,
                )
                .bind(workspace_id.as_uuid())
                .bind(mutation.entity_kind.table_name())
                .bind(mutation.entity_id.as_uuid())
                .bind(JsonValue::Object(fields.clone()))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("insert_entity", e))?;

                if inserted.rows_affected() == 0 {
                    return Err(StoreError::AlreadyExists);
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
                let current = self
                    .load_entity_for_update(&mut tx, workspace_id, mutation.entity_kind, mutation.entity_id)
                    .await?;

                let old = mutation
                    .event
                    .transition_of
                    .as_deref()
                    .map(|f| current.fields.get(f).cloned().unwrap_or(JsonValue::Null));

                let mut next = current;
                for (field, value) in fields {
                    next.fields.insert(field.clone(), value.clone());
                }
                next.updated_at = now;

                sqlx::query(
                    r#"
                    UPDATE entities SET fields = $4, updated_at = $5
                    WHERE workspace_id = $1 AND kind = $2 AND id = $3
                    "#,
                )
                .bind(workspace_id.as_uuid())
                .bind(mutation.entity_kind.table_name())
                .bind(mutation.entity_id.as_uuid())
                .bind(JsonValue::Object(next.fields.clone()))
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("update_entity", e))?;

                (next, old)
            }
            WriteOp::Delete => {
                let current = self
                    .load_entity_for_update(&mut tx, workspace_id, mutation.entity_kind, mutation.entity_id)
                    .await?;

                let mut next = current;
                next.updated_at = now;
                next.deleted_at = Some(now);

                sqlx::query(
                    r#"
                    UPDATE entities SET updated_at = $4, deleted_at = $4
                    WHERE workspace_id = $1 AND kind = $2 AND id = $3
                    "#,
                )
                .bind(workspace_id.as_uuid())
                .bind(mutation.entity_kind.table_name())
                .bind(mutation.entity_id.as_uuid())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_entity", e))?;

                (next, None)
            }
        };

        let seq_row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(seq), 0) AS current_seq
            FROM activity_events
            WHERE workspace_id = $1 AND entity_id = $2
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(mutation.entity_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("current_seq", e))?;
        let seq = (seq_row.get::<i64, _>("current_seq") as u64) + 1;

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

        sqlx::query(
            r#"
            INSERT INTO activity_events (
                id, workspace_id, entity_kind, entity_id,
                actor_id, actor_kind, event_type, payload, seq, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id())
        .bind(workspace_id.as_uuid())
        .bind(mutation.entity_kind.table_name())
        .bind(mutation.entity_id.as_uuid())
        .bind(mutation.actor.id.as_uuid())
        .bind(mutation.actor.kind.as_str())
        .bind(event.event_type())
        .bind(event.payload())
        .bind(seq as i64)
        .bind(event.recorded_at())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "concurrent append detected: seq {seq} already exists"
                ))
            } else {
                map_sqlx_error("append_event", e)
            }
        })?;

        if let Some(key) = &mutation.idempotency_key {
            sqlx::query(
                "UPDATE idempotency_keys SET response = $3 WHERE workspace_id = $1 AND key = $2",
            )
            .bind(workspace_id.as_uuid())
            .bind(key.as_str())
            .bind(receipt_data(&entity, &event))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("commit_key", e))?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Ok(MutationOutcome::Applied { entity, event })
    }

    #[instrument(skip(self, filter, page), fields(workspace_id = %workspace_id), err)]
    async fn query_ledger(
        &self,
        workspace_id: WorkspaceId,
        filter: &LedgerFilter,
        page: Page,
    ) -> Result<LedgerPage, StoreError> {
        let kind_param: Option<&str> = filter.entity_kind.map(|k| k.table_name());
        let entity_param: Option<Uuid> = filter.entity_id.map(|id| *id.as_uuid());
        let actor_param: Option<Uuid> = filter.actor_id.map(|id| *id.as_uuid());
        let type_param: Option<&str> = filter.event_type.as_deref();

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM activity_events
            WHERE workspace_id = $1
                AND ($2::text IS NULL OR entity_kind = $2)
                AND ($3::uuid IS NULL OR entity_id = $3)
                AND ($4::uuid IS NULL OR actor_id = $4)
                AND ($5::text IS NULL OR event_type = $5)
                AND ($6::timestamptz IS NULL OR recorded_at >= $6)
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(kind_param)
        .bind(entity_param)
        .bind(actor_param)
        .bind(type_param)
        .bind(filter.since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_events", e))?;
        let total: i64 = count_row.get("total");

        let rows = sqlx::query(
            r#"
            SELECT id, entity_kind, entity_id, actor_id, actor_kind,
                   event_type, payload, seq, recorded_at
            FROM activity_events
            WHERE workspace_id = $1
                AND ($2::text IS NULL OR entity_kind = $2)
                AND ($3::uuid IS NULL OR entity_id = $3)
                AND ($4::uuid IS NULL OR actor_id = $4)
                AND ($5::text IS NULL OR event_type = $5)
                AND ($6::timestamptz IS NULL OR recorded_at >= $6)
            ORDER BY recorded_at ASC, seq ASC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(kind_param)
        .bind(entity_param)
        .bind(actor_param)
        .bind(type_param)
        .bind(filter.since)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_events", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(event_from_row(workspace_id, &row)?);
        }

        let has_more = total > (page.offset + page.limit) as i64;
        Ok(LedgerPage {
            events,
            total: total as u64,
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
        let row = sqlx::query(
            r#"
            SELECT fields, created_at, updated_at, deleted_at
            FROM entities
            WHERE workspace_id = $1 AND kind = $2 AND id = $3
            "#,
        )
        .bind(workspace_id.as_uuid())
        .bind(kind.table_name())
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_entity", e))?;

        let Some(row) = row else { return Ok(None) };
        let fields: JsonValue = row.get("fields");
        let fields: FieldMap = fields
            .as_object()
            .cloned()
            .ok_or_else(|| StoreError::Storage("entity fields are not an object".to_string()))?;

        Ok(Some(EntityState {
            kind,
            id,
            workspace_id,
            fields,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        }))
    }

    async fn sweep_idempotency(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(older_than)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("sweep_idempotency", e))?;
        Ok(result.rows_affected())
    }
}

fn event_from_row(
    workspace_id: WorkspaceId,
    row: &sqlx::postgres::PgRow,
) -> Result<ActivityEvent, StoreError> {
    let kind_str: String = row.get("entity_kind");
    let kind = EntityKind::from_table_name(&kind_str)
        .map_err(|_| StoreError::Storage(format!("unknown entity_kind '{kind_str}' in ledger")))?;

    let actor_kind_str: String = row.get("actor_kind");
    let actor_kind = match actor_kind_str.as_str() {
        "human" => ActorKind::Human,
        "agent" => ActorKind::Agent,
        other => {
            return Err(StoreError::Storage(format!(
                "unknown actor_kind '{other}' in ledger"
            )));
        }
    };

    Ok(ActivityEvent::new(
        row.get::<Uuid, _>("id"),
        workspace_id,
        kind,
        EntityId::from_uuid(row.get("entity_id")),
        ActorId::from_uuid(row.get("actor_id")),
        actor_kind,
        row.get::<String, _>("event_type"),
        row.get::<JsonValue, _>("payload"),
        row.get::<i64, _>("seq") as u64,
        row.get::<DateTime<Utc>, _>("recorded_at"),
    ))
}

/// Map sqlx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
