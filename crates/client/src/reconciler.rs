//! Merging broadcast echoes with pending optimistic edits.
//!
//! A caller that renders its own edit before the server confirms it will
//! later receive that same change back over the broadcast feed. Applying
//! the echo again is harmless when nothing moved in between, but an echo
//! that arrives after a newer local edit must not roll the view back. The
//! rule: accept an incoming update only when its timestamp is at least as
//! new as the locally held one.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use agentbase_core::EntityId;
use agentbase_ledger::ChangeNotice;

/// What to do with one incoming broadcast notice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EchoDisposition {
    /// Apply the update to local state.
    Apply,
    /// Own pending write echoed back; local state already shows it.
    DropOwnEcho,
    /// Older than what is locally held; applying would regress the view.
    DropStale,
}

/// Per-viewer reconciliation state.
///
/// Synchronous and IO-free by design; the surrounding client owns the
/// subscription loop and the actual state container.
#[derive(Debug, Default)]
pub struct OptimisticReconciler {
    /// Entities with an optimistic local write not yet confirmed.
    pending: HashSet<EntityId>,
    /// Newest timestamp applied locally, per entity.
    applied_at: HashMap<EntityId, DateTime<Utc>>,
}

impl OptimisticReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an optimistic local edit made at `at`, before the server
    /// confirmed it.
    pub fn note_local_edit(&mut self, entity_id: EntityId, at: DateTime<Utc>) {
        self.pending.insert(entity_id);
        self.bump(entity_id, at);
    }

    /// The server confirmed the caller's own command (synchronous
    /// response, not the broadcast echo). The pending marker clears; the
    /// commit timestamp becomes the local watermark.
    pub fn confirm(&mut self, entity_id: EntityId, committed_at: DateTime<Utc>) {
        self.pending.remove(&entity_id);
        self.bump(entity_id, committed_at);
    }

    /// Decide what to do with a broadcast notice.
    pub fn resolve(&mut self, notice: &ChangeNotice) -> EchoDisposition {
        self.resolve_at(notice.entity_id, notice.recorded_at)
    }

    /// Timestamp-only variant for callers that carry their own payloads.
    pub fn resolve_at(&mut self, entity_id: EntityId, at: DateTime<Utc>) -> EchoDisposition {
        if let Some(held) = self.applied_at.get(&entity_id) {
            if at < *held {
                return EchoDisposition::DropStale;
            }
        }

        if self.pending.contains(&entity_id) {
            // Same data the caller already rendered; skip the no-op apply.
            return EchoDisposition::DropOwnEcho;
        }

        self.bump(entity_id, at);
        EchoDisposition::Apply
    }

    pub fn has_pending(&self, entity_id: EntityId) -> bool {
        self.pending.contains(&entity_id)
    }

    fn bump(&mut self, entity_id: EntityId, at: DateTime<Utc>) {
        let held = self.applied_at.entry(entity_id).or_insert(at);
        if at > *held {
            *held = at;
        }
    }
}
