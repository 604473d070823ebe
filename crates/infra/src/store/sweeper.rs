//! Background eviction of expired idempotency records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::r#trait::{idempotency_ttl, WorkspaceStore};

/// Default interval between sweep passes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Spawn the idempotency sweeper.
///
/// Deletes records strictly older than the retention TTL. This is a
/// liveness concern only; the TTL itself is never shortened, since a record
/// evicted early would reopen the double-apply window for a late retry.
pub fn spawn_idempotency_sweeper<S>(
    store: Arc<S>,
    every: Duration,
) -> tokio::task::JoinHandle<()>
where
    S: WorkspaceStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let cutoff = Utc::now() - idempotency_ttl();
            match store.sweep_idempotency(cutoff).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "swept expired idempotency records"),
                Err(e) => tracing::warn!("idempotency sweep failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWorkspaceStore;

    #[tokio::test]
    async fn sweeper_task_runs_and_survives_empty_sweeps() {
        let store = Arc::new(InMemoryWorkspaceStore::new());
        let handle = spawn_idempotency_sweeper(store, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
