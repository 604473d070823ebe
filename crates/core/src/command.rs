//! The command model: caller-submitted intents to mutate workspace state.
//!
//! Two shapes exist. **Named** commands carry semantic meaning and their own
//! payload schema; **generic** field patches address an allow-listed table
//! directly. Both are transient: commands are validated and turned into a
//! mutation plus one ledger event, never persisted themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entity::{EntityKind, FieldMap};
use crate::error::CommandError;
use crate::id::EntityId;

/// Maximum accepted idempotency key length, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Caller-supplied token making a retried command execute at most once.
///
/// Opaque to the pipeline; only length is enforced at parse. Browser
/// callers typically omit it, agent callers should always send one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = CommandError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(CommandError::validation("idempotency_key must not be empty"));
        }
        if value.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(CommandError::validation(format!(
                "idempotency_key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
            )));
        }
        Ok(Self(value))
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

/// Task statuses accepted by `create_task` / `change_status`.
pub const TASK_STATUSES: &[&str] = &["todo", "in_progress", "done", "archived"];

/// Deal stages accepted by `create_deal` / `change_status`.
pub const DEAL_STAGES: &[&str] = &["lead", "qualified", "won", "lost"];

/// A semantic command with its own payload schema.
///
/// The set is closed; `parse()` is the only way in from the wire, keyed by
/// the action segment of the request path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum NamedCommand {
    CreateTask {
        title: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        due_date: Option<DateTime<Utc>>,
    },
    CreateContact {
        name: String,
        #[serde(default)]
        email: Option<String>,
    },
    CreateDeal {
        name: String,
        #[serde(default)]
        amount: Option<f64>,
        #[serde(default)]
        stage: Option<String>,
    },
    AddNote {
        table: String,
        id: EntityId,
        body: String,
    },
    ChangeStatus {
        table: String,
        id: EntityId,
        status: String,
    },
    DeleteEntity {
        table: String,
        id: EntityId,
    },
}

impl NamedCommand {
    /// Parse the action path segment plus JSON body into a command.
    ///
    /// The body may carry `idempotency_key`; it is stripped before schema
    /// matching and returned separately.
    pub fn parse(
        action: &str,
        mut body: JsonValue,
    ) -> Result<(Self, Option<IdempotencyKey>), CommandError> {
        let obj = body
            .as_object_mut()
            .ok_or_else(|| CommandError::validation("command body must be a JSON object"))?;

        let key = match obj.remove("idempotency_key") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) => Some(IdempotencyKey::try_from(s)?),
            Some(_) => {
                return Err(CommandError::validation("idempotency_key must be a string"));
            }
        };

        obj.insert("action".to_string(), JsonValue::String(action.to_string()));

        let cmd: NamedCommand = serde_json::from_value(body)
            .map_err(|e| CommandError::validation(format!("invalid payload for '{action}': {e}")))?;
        cmd.validate()?;
        Ok((cmd, key))
    }

    /// Deterministic payload-shape validation, past what serde enforces.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            NamedCommand::CreateTask { title, status, .. } => {
                require_nonempty("title", title)?;
                if let Some(s) = status {
                    require_member("status", s, TASK_STATUSES)?;
                }
            }
            NamedCommand::CreateContact { name, email } => {
                require_nonempty("name", name)?;
                if let Some(e) = email {
                    if !e.contains('@') {
                        return Err(CommandError::validation("email must contain '@'"));
                    }
                }
            }
            NamedCommand::CreateDeal { name, amount, stage } => {
                require_nonempty("name", name)?;
                if let Some(a) = amount {
                    if !a.is_finite() || *a < 0.0 {
                        return Err(CommandError::validation("amount must be a non-negative number"));
                    }
                }
                if let Some(s) = stage {
                    require_member("stage", s, DEAL_STAGES)?;
                }
            }
            NamedCommand::AddNote { table, body, .. } => {
                EntityKind::from_table_name(table)?;
                require_nonempty("body", body)?;
            }
            NamedCommand::ChangeStatus { table, status, .. } => {
                let kind = EntityKind::from_table_name(table)?;
                match kind {
                    EntityKind::Task => require_member("status", status, TASK_STATUSES)?,
                    EntityKind::Deal => require_member("status", status, DEAL_STAGES)?,
                    other => {
                        return Err(CommandError::validation(format!(
                            "'{other}' rows have no status to change"
                        )));
                    }
                }
            }
            NamedCommand::DeleteEntity { table, .. } => {
                EntityKind::from_table_name(table)?;
            }
        }
        Ok(())
    }

    /// The action name this command is submitted under.
    pub fn action(&self) -> &'static str {
        match self {
            NamedCommand::CreateTask { .. } => "create_task",
            NamedCommand::CreateContact { .. } => "create_contact",
            NamedCommand::CreateDeal { .. } => "create_deal",
            NamedCommand::AddNote { .. } => "add_note",
            NamedCommand::ChangeStatus { .. } => "change_status",
            NamedCommand::DeleteEntity { .. } => "delete_entity",
        }
    }
}

/// A generic field patch: table/id/field-map, no semantic interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    pub table: String,
    pub id: EntityId,
    pub fields: FieldMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl FieldPatch {
    /// Resolve the target kind and reject protected fields.
    ///
    /// Protected-field rejection happens here, before any write is
    /// attempted, and fails the whole patch.
    pub fn validate(&self) -> Result<EntityKind, CommandError> {
        let kind = EntityKind::from_table_name(&self.table)?;
        if self.fields.is_empty() {
            return Err(CommandError::validation("fields must not be empty"));
        }
        for field in self.fields.keys() {
            if kind.is_protected_field(field) {
                return Err(CommandError::protected_field(field.clone()));
            }
        }
        Ok(kind)
    }
}

/// Either shape of caller intent, after edge parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Named {
        command: NamedCommand,
        idempotency_key: Option<IdempotencyKey>,
    },
    Patch(FieldPatch),
}

impl Command {
    pub fn idempotency_key(&self) -> Option<&IdempotencyKey> {
        match self {
            Command::Named { idempotency_key, .. } => idempotency_key.as_ref(),
            Command::Patch(patch) => patch.idempotency_key.as_ref(),
        }
    }
}

fn require_nonempty(field: &str, value: &str) -> Result<(), CommandError> {
    if value.trim().is_empty() {
        return Err(CommandError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_member(field: &str, value: &str, allowed: &[&str]) -> Result<(), CommandError> {
    if !allowed.contains(&value) {
        return Err(CommandError::validation(format!(
            "{field} must be one of: {}",
            allowed.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_task_parses_and_strips_key() {
        let (cmd, key) = NamedCommand::parse(
            "create_task",
            json!({"title": "x", "idempotency_key": "k1"}),
        )
        .unwrap();
        assert!(matches!(cmd, NamedCommand::CreateTask { ref title, .. } if title == "x"));
        assert_eq!(key.unwrap().as_str(), "k1");
    }

    #[test]
    fn empty_title_fails_validation() {
        let err = NamedCommand::parse("create_task", json!({"title": "  "})).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn unknown_action_fails_validation() {
        let err = NamedCommand::parse("drop_database", json!({})).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn oversized_idempotency_key_is_rejected() {
        let err = NamedCommand::parse(
            "create_task",
            json!({"title": "x", "idempotency_key": "k".repeat(129)}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn change_status_enforces_per_kind_sets() {
        let (ok, _) = NamedCommand::parse(
            "change_status",
            json!({"table": "tasks", "id": EntityId::new(), "status": "done"}),
        )
        .unwrap();
        assert_eq!(ok.action(), "change_status");

        let err = NamedCommand::parse(
            "change_status",
            json!({"table": "tasks", "id": EntityId::new(), "status": "won"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let err = NamedCommand::parse(
            "change_status",
            json!({"table": "contacts", "id": EntityId::new(), "status": "done"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn patch_rejects_protected_fields_before_anything_else() {
        let patch = FieldPatch {
            table: "tasks".to_string(),
            id: EntityId::new(),
            fields: [
                ("title".to_string(), json!("new")),
                ("workspace_id".to_string(), json!("sneaky")),
            ]
            .into_iter()
            .collect(),
            idempotency_key: None,
        };
        let err = patch.validate().unwrap_err();
        assert_eq!(err, CommandError::protected_field("workspace_id"));
    }

    #[test]
    fn patch_rejects_unlisted_tables() {
        let patch = FieldPatch {
            table: "users".to_string(),
            id: EntityId::new(),
            fields: [("name".to_string(), json!("x"))].into_iter().collect(),
            idempotency_key: None,
        };
        assert_eq!(patch.validate().unwrap_err().kind(), "validation_error");
    }
}
