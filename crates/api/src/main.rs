use std::sync::Arc;

use agentbase_auth::{ActorResolver, StaticAuthority, StaticDirectory};
use agentbase_core::WorkspaceId;

#[tokio::main]
async fn main() {
    agentbase_observability::init();

    // Identity wiring. The static authority stands in for the external
    // identity provider; a deployment swaps in an implementation that
    // calls its real authority.
    let authority = Arc::new(StaticAuthority::new());
    let directory = Arc::new(StaticDirectory::new());
    seed_dev_identity(&authority, &directory);
    let resolver = Arc::new(ActorResolver::new(authority, directory));

    let services = build_services().await;

    let app = agentbase_api::app::build_app(resolver, Arc::new(services));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

#[cfg(feature = "postgres")]
async fn build_services() -> agentbase_api::app::AppServices {
    if std::env::var("DATABASE_URL").is_ok() {
        return agentbase_api::app::services::build_persistent_services()
            .await
            .expect("failed to build postgres services");
    }
    tracing::warn!("DATABASE_URL not set; falling back to the in-memory store");
    agentbase_api::app::services::build_in_memory_services()
}

#[cfg(not(feature = "postgres"))]
async fn build_services() -> agentbase_api::app::AppServices {
    agentbase_api::app::services::build_in_memory_services()
}

/// Seed one human member from the environment for local development.
fn seed_dev_identity(authority: &StaticAuthority, directory: &StaticDirectory) {
    let Ok(token) = std::env::var("DEV_TOKEN") else {
        return;
    };
    tracing::warn!("DEV_TOKEN set; seeding an insecure development identity");

    let workspace_id = std::env::var("DEV_WORKSPACE_ID")
        .ok()
        .and_then(|v| v.parse::<WorkspaceId>().ok())
        .unwrap_or_default();
    let identity = uuid::Uuid::now_v7();
    authority.issue(token, identity);
    directory.add_member(identity, workspace_id);
    tracing::info!(%workspace_id, "development identity ready");
}
