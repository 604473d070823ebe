//! Infrastructure wiring (store, executor, limiter, broadcaster).

use std::sync::Arc;

use agentbase_auth::Actor;
use agentbase_core::{Command, CommandError, WorkspaceId};
use agentbase_infra::broadcast::WorkspaceBroadcaster;
use agentbase_infra::executor::{CommandReceipt, MutationExecutor};
use agentbase_infra::rate_limit::FixedWindowRateLimiter;
use agentbase_infra::store::{spawn_idempotency_sweeper, InMemoryWorkspaceStore, SWEEP_INTERVAL};
#[cfg(feature = "postgres")]
use agentbase_infra::store::PostgresWorkspaceStore;
use agentbase_ledger::{ChangeNotice, LedgerFilter, LedgerPage, Page};
use tokio::sync::broadcast;

/// The wired pipeline, one variant per storage backend.
pub enum AppServices {
    InMemory {
        executor: Arc<MutationExecutor<InMemoryWorkspaceStore>>,
        store: Arc<InMemoryWorkspaceStore>,
        broadcaster: Arc<WorkspaceBroadcaster>,
    },
    #[cfg(feature = "postgres")]
    Persistent {
        executor: Arc<MutationExecutor<PostgresWorkspaceStore>>,
        store: Arc<PostgresWorkspaceStore>,
        broadcaster: Arc<WorkspaceBroadcaster>,
    },
}

impl AppServices {
    pub async fn execute(
        &self,
        actor: Actor,
        command: Command,
    ) -> Result<CommandReceipt, CommandError> {
        match self {
            AppServices::InMemory { executor, .. } => executor.execute(actor, command).await,
            #[cfg(feature = "postgres")]
            AppServices::Persistent { executor, .. } => executor.execute(actor, command).await,
        }
    }

    pub async fn query_ledger(
        &self,
        actor: Actor,
        filter: &LedgerFilter,
        page: Page,
    ) -> Result<LedgerPage, CommandError> {
        match self {
            AppServices::InMemory { executor, .. } => {
                executor.query_ledger(actor, filter, page).await
            }
            #[cfg(feature = "postgres")]
            AppServices::Persistent { executor, .. } => {
                executor.query_ledger(actor, filter, page).await
            }
        }
    }

    /// Open a change feed for one workspace. Scoping happens here, from
    /// the resolved workspace id; caller filters only narrow further.
    pub fn subscribe(&self, workspace_id: WorkspaceId) -> broadcast::Receiver<ChangeNotice> {
        match self {
            AppServices::InMemory { broadcaster, .. } => broadcaster.subscribe(workspace_id),
            #[cfg(feature = "postgres")]
            AppServices::Persistent { broadcaster, .. } => broadcaster.subscribe(workspace_id),
        }
    }
}

fn rate_limiter_from_env() -> Arc<FixedWindowRateLimiter> {
    let budget = std::env::var("RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(agentbase_infra::rate_limit::DEFAULT_BUDGET);
    Arc::new(FixedWindowRateLimiter::new(
        budget,
        agentbase_infra::rate_limit::DEFAULT_WINDOW,
    ))
}

/// In-memory wiring (dev/test): store + limiter + broadcaster + sweeper.
pub fn build_in_memory_services() -> AppServices {
    let store = Arc::new(InMemoryWorkspaceStore::new());
    let broadcaster = Arc::new(WorkspaceBroadcaster::new());
    let executor = Arc::new(MutationExecutor::new(
        store.clone(),
        rate_limiter_from_env(),
        broadcaster.clone(),
    ));

    // Detached: runs for the life of the process.
    let _ = spawn_idempotency_sweeper(store.clone(), SWEEP_INTERVAL);

    AppServices::InMemory {
        executor,
        store,
        broadcaster,
    }
}

#[cfg(feature = "postgres")]
pub async fn build_persistent_services() -> anyhow::Result<AppServices> {
    use anyhow::Context;

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set for the postgres backend")?;

    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PostgresWorkspaceStore::new(pool));
    store
        .migrate()
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;

    let broadcaster = Arc::new(WorkspaceBroadcaster::new());
    let executor = Arc::new(MutationExecutor::new(
        store.clone(),
        rate_limiter_from_env(),
        broadcaster.clone(),
    ));

    let _ = spawn_idempotency_sweeper(store.clone(), SWEEP_INTERVAL);

    Ok(AppServices::Persistent {
        executor,
        store,
        broadcaster,
    })
}
