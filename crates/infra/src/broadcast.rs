//! Realtime fan-out of committed changes.
//!
//! One lossy broadcast channel per workspace, created lazily on first
//! subscribe and dropped when the last receiver disconnects. Channel
//! selection is by the server-resolved workspace id, so a subscriber can
//! never receive another workspace's notices regardless of the filter it
//! asks for; the filter only narrows within the workspace.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use agentbase_core::{EntityId, EntityKind, WorkspaceId};
use agentbase_ledger::ChangeNotice;

/// Per-channel buffer. Lossy: a subscriber that lags past this many
/// notices sees a `Lagged` error and should re-fetch state.
pub const CHANNEL_CAPACITY: usize = 256;

/// Optional narrowing of a subscription within its workspace.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<EntityId>,
}

impl SubscriptionFilter {
    pub fn matches(&self, notice: &ChangeNotice) -> bool {
        if let Some(kind) = self.entity_kind {
            if notice.entity_kind != kind {
                return false;
            }
        }
        if let Some(id) = self.entity_id {
            if notice.entity_id != id {
                return false;
            }
        }
        true
    }
}

/// Workspace-scoped broadcast hub.
#[derive(Debug, Default)]
pub struct WorkspaceBroadcaster {
    channels: DashMap<WorkspaceId, broadcast::Sender<ChangeNotice>>,
}

impl WorkspaceBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one workspace's change feed.
    ///
    /// The caller applies `SubscriptionFilter` on receive; dropping the
    /// receiver is the unsubscribe.
    pub fn subscribe(&self, workspace_id: WorkspaceId) -> broadcast::Receiver<ChangeNotice> {
        self.channels
            .entry(workspace_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a committed change to live subscribers of its workspace.
    ///
    /// Best-effort: no subscribers is not an error, and a full buffer drops
    /// the oldest notice for the lagging receiver only.
    pub fn publish(&self, notice: ChangeNotice) {
        let workspace_id = notice.workspace_id;
        let delivered = match self.channels.get(&workspace_id) {
            Some(tx) => tx.send(notice).is_ok(),
            None => false,
        };

        if !delivered {
            // Last receiver is gone; drop the idle channel.
            self.channels
                .remove_if(&workspace_id, |_, tx| tx.receiver_count() == 0);
        }
    }

    pub fn subscriber_count(&self, workspace_id: WorkspaceId) -> usize {
        self.channels
            .get(&workspace_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}
