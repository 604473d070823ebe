//! Ledger query model: filters and pagination.
//!
//! Queries are always implicitly scoped to the calling actor's workspace;
//! the workspace id is a separate argument to the store, never part of the
//! caller-controlled filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agentbase_core::{ActorId, EntityId, EntityKind};

use crate::event::ActivityEvent;

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 200;

/// Caller-controlled ledger filters. All optional, all conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<EntityId>,
    pub actor_id: Option<ActorId>,
    pub event_type: Option<String>,
    /// Time lower bound (inclusive) on `recorded_at`.
    pub since: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn matches(&self, event: &ActivityEvent) -> bool {
        if let Some(kind) = self.entity_kind {
            if event.entity_kind() != kind {
                return false;
            }
        }
        if let Some(id) = self.entity_id {
            if event.entity_id() != id {
                return false;
            }
        }
        if let Some(actor) = self.actor_id {
            if event.actor_id() != actor {
                return false;
            }
        }
        if let Some(ref event_type) = self.event_type {
            if event.event_type() != event_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.recorded_at() < since {
                return false;
            }
        }
        true
    }
}

/// Offset pagination, clamped to a server-side ceiling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

/// One page of ledger history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub events: Vec<ActivityEvent>,
    pub total: u64,
    pub page: Page,
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(10_000, 0).limit, MAX_PAGE_LIMIT);
        assert_eq!(Page::default().limit, DEFAULT_PAGE_LIMIT);
    }
}
