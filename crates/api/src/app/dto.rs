//! Request DTOs and query-parameter mapping.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use agentbase_core::{ActorId, CommandError, EntityId, EntityKind};
use agentbase_infra::broadcast::SubscriptionFilter;
use agentbase_ledger::{LedgerFilter, Page, DEFAULT_PAGE_LIMIT};

/// Query parameters of `GET /activity`.
#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub entity_kind: Option<String>,
    pub entity_id: Option<EntityId>,
    pub actor_id: Option<ActorId>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ActivityQuery {
    pub fn into_filter_and_page(self) -> Result<(LedgerFilter, Page), CommandError> {
        let entity_kind = self
            .entity_kind
            .as_deref()
            .map(EntityKind::from_table_name)
            .transpose()?;

        let filter = LedgerFilter {
            entity_kind,
            entity_id: self.entity_id,
            actor_id: self.actor_id,
            event_type: self.event_type,
            since: self.since,
        };
        let page = Page::new(
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            self.offset.unwrap_or(0),
        );
        Ok((filter, page))
    }
}

/// Query parameters of `GET /stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub entity_kind: Option<String>,
    pub entity_id: Option<EntityId>,
}

impl StreamQuery {
    pub fn into_filter(self) -> Result<SubscriptionFilter, CommandError> {
        let entity_kind = self
            .entity_kind
            .as_deref()
            .map(EntityKind::from_table_name)
            .transpose()?;
        Ok(SubscriptionFilter {
            entity_kind,
            entity_id: self.entity_id,
        })
    }
}
