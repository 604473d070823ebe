//! The closed set of mutable entity kinds the pipeline will touch.
//!
//! The pipeline does not know entity-specific schemas. What it does know,
//! per kind, is the table name callers address it by, the fields no command
//! may overwrite, and nothing else. Anything outside this registry is not
//! mutable through the pipeline at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CommandError;
use crate::id::{EntityId, WorkspaceId};

/// Generic field map for a mutable entity row.
///
/// `serde_json::Map` is a `BTreeMap` underneath, so serialization order is
/// deterministic. Idempotent replays rely on that.
pub type FieldMap = serde_json::Map<String, JsonValue>;

/// Closed tagged set of mutable entity kinds.
///
/// A string table name from a caller is parsed into this enum exactly once,
/// at the edge; everything downstream dispatches on the variant. The serde
/// names match `table_name()`, so JSON speaks the same vocabulary callers
/// address tables by.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "tasks")]
    Task,
    #[serde(rename = "contacts")]
    Contact,
    #[serde(rename = "deals")]
    Deal,
    #[serde(rename = "notes")]
    Note,
    #[serde(rename = "list_items")]
    ListItem,
}

/// Fields present on every entity row that no command may write.
const COMMON_PROTECTED: &[&str] = &["id", "workspace_id", "created_at"];

impl EntityKind {
    pub const ALL: &'static [EntityKind] = &[
        EntityKind::Task,
        EntityKind::Contact,
        EntityKind::Deal,
        EntityKind::Note,
        EntityKind::ListItem,
    ];

    /// The allow-listed table name callers use to address this kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Contact => "contacts",
            EntityKind::Deal => "deals",
            EntityKind::Note => "notes",
            EntityKind::ListItem => "list_items",
        }
    }

    /// Parse a caller-supplied table name against the allow-list.
    ///
    /// Unknown tables fail validation; they are not `NotFound`, because the
    /// caller named a table the pipeline will never serve.
    pub fn from_table_name(table: &str) -> Result<Self, CommandError> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.table_name() == table)
            .ok_or_else(|| CommandError::validation(format!("unknown table '{table}'")))
    }

    /// Fields no command may write for this kind, in addition to the
    /// identity/tenancy/creation fields shared by all kinds.
    fn own_protected_fields(&self) -> &'static [&'static str] {
        match self {
            // Tasks carry a server-assigned per-workspace ticket number.
            EntityKind::Task => &["ticket_number"],
            EntityKind::Deal => &["deal_number"],
            EntityKind::Contact | EntityKind::Note | EntityKind::ListItem => &[],
        }
    }

    /// Full protected-field set for this kind.
    pub fn protected_fields(&self) -> impl Iterator<Item = &'static str> {
        COMMON_PROTECTED
            .iter()
            .chain(self.own_protected_fields())
            .copied()
    }

    pub fn is_protected_field(&self, field: &str) -> bool {
        self.protected_fields().any(|f| f == field)
    }

    /// Ledger event type for a lifecycle operation on this kind,
    /// e.g. `task.created`, `deal.status_changed`.
    pub fn event_type(&self, verb: &str) -> String {
        let noun = match self {
            EntityKind::Task => "task",
            EntityKind::Contact => "contact",
            EntityKind::Deal => "deal",
            EntityKind::Note => "note",
            EntityKind::ListItem => "list_item",
        };
        format!("{noun}.{verb}")
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// The pipeline's generic view of one mutable entity row.
///
/// Entity-specific schema lives with the external collaborators that render
/// and validate these rows; the pipeline only guarantees identity, tenancy,
/// timestamps, and the field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub kind: EntityKind,
    pub id: EntityId,
    pub workspace_id: WorkspaceId,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EntityState {
    /// External JSON shape of the row, as returned in command responses and
    /// broadcast snapshots. Protected metadata is presented at the top level,
    /// never inside `fields`.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "table": self.kind.table_name(),
            "id": self.id,
            "fields": self.fields,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "deleted_at": self.deleted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table_name(kind.table_name()).unwrap(), *kind);
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        let err = EntityKind::from_table_name("profiles").unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn identity_fields_are_protected_everywhere() {
        for kind in EntityKind::ALL {
            assert!(kind.is_protected_field("id"));
            assert!(kind.is_protected_field("workspace_id"));
            assert!(kind.is_protected_field("created_at"));
        }
        assert!(EntityKind::Task.is_protected_field("ticket_number"));
        assert!(!EntityKind::Task.is_protected_field("title"));
    }
}
