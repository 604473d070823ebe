//! Black-box tests over the real HTTP surface: router, middleware, and
//! pipeline wired exactly as in production, bound to an ephemeral port.

use std::sync::Arc;

use agentbase_auth::{ActorResolver, AgentBinding, StaticAuthority, StaticDirectory};
use agentbase_core::{ActorId, WorkspaceId};
use reqwest::StatusCode;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

struct TestServer {
    base_url: String,
    authority: Arc<StaticAuthority>,
    directory: Arc<StaticDirectory>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_budget(None).await
    }

    async fn spawn_with_budget(budget_per_minute: Option<u32>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let authority = Arc::new(StaticAuthority::new());
        let directory = Arc::new(StaticDirectory::new());
        let resolver = Arc::new(ActorResolver::new(authority.clone(), directory.clone()));

        let services = match budget_per_minute {
            None => agentbase_api::app::services::build_in_memory_services(),
            Some(budget) => {
                use agentbase_infra::broadcast::WorkspaceBroadcaster;
                use agentbase_infra::executor::MutationExecutor;
                use agentbase_infra::rate_limit::{FixedWindowRateLimiter, DEFAULT_WINDOW};
                use agentbase_infra::store::InMemoryWorkspaceStore;

                let store = Arc::new(InMemoryWorkspaceStore::new());
                let broadcaster = Arc::new(WorkspaceBroadcaster::new());
                let limiter = Arc::new(FixedWindowRateLimiter::new(budget, DEFAULT_WINDOW));
                let executor = Arc::new(MutationExecutor::new(
                    store.clone(),
                    limiter,
                    broadcaster.clone(),
                ));
                agentbase_api::app::services::AppServices::InMemory {
                    executor,
                    store,
                    broadcaster,
                }
            }
        };
        let services = Arc::new(services);
        let app = agentbase_api::app::build_app(resolver, services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            authority,
            directory,
            handle,
        }
    }

    /// Issue a credential for a human member of `workspace`.
    fn issue_member(&self, token: &str, workspace: WorkspaceId) {
        let identity = Uuid::now_v7();
        self.authority.issue(token, identity);
        self.directory.add_member(identity, workspace);
    }

    /// Issue a credential for a registered agent bound to `workspace`.
    fn issue_agent(&self, token: &str, workspace: WorkspaceId) {
        let identity = Uuid::now_v7();
        self.authority.issue(token, identity);
        self.directory.register_agent(
            identity,
            AgentBinding {
                actor_id: ActorId::new(),
                workspace_id: workspace,
            },
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn post_command(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    action: &str,
    body: JsonValue,
) -> reqwest::Response {
    client
        .post(format!("{}/commands/{}", server.base_url, action))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn activity(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    query: &str,
) -> JsonValue {
    let res = client
        .get(format!("{}/activity{}", server.base_url, query))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

#[tokio::test]
async fn missing_credential_is_unauthenticated() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/commands/create_task", server.base_url))
        .json(&json!({"title": "x"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["kind"], json!("unauthenticated"));
}

#[tokio::test]
async fn identity_without_membership_cannot_write() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Verified identity, no workspace.
    server.authority.issue("orphan", Uuid::now_v7());

    let res = post_command(&client, &server, "orphan", "create_task", json!({"title": "x"})).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"]["kind"], json!("no_workspace"));
}

#[tokio::test]
async fn revoked_credential_stops_working_immediately() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("tok", WorkspaceId::new());

    let res = post_command(&client, &server, "tok", "create_task", json!({"title": "a"})).await;
    assert_eq!(res.status(), StatusCode::OK);

    server.authority.revoke("tok");
    let res = post_command(&client, &server, "tok", "create_task", json!({"title": "b"})).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_task_retry_with_same_key_is_exactly_once() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let workspace = WorkspaceId::new();
    server.issue_agent("agent-tok", workspace);

    let body = json!({"title": "x", "idempotency_key": "k1"});
    let first = post_command(&client, &server, "agent-tok", "create_task", body.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first: JsonValue = first.json().await.unwrap();

    // The client assumes the first response was lost and retries verbatim.
    let second = post_command(&client, &server, "agent-tok", "create_task", body).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second: JsonValue = second.json().await.unwrap();

    assert_eq!(
        serde_json::to_string(&first["data"]).unwrap(),
        serde_json::to_string(&second["data"]).unwrap(),
        "replayed data must be byte-identical"
    );

    let history = activity(&client, &server, "agent-tok", "").await;
    assert_eq!(history["data"]["total"], json!(1));
    assert_eq!(
        history["data"]["events"][0]["event_type"],
        json!("task.created")
    );
}

#[tokio::test]
async fn generic_patch_works_and_protected_fields_are_rejected() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("tok", WorkspaceId::new());

    let created = post_command(&client, &server, "tok", "create_task", json!({"title": "x"})).await;
    let created: JsonValue = created.json().await.unwrap();
    let id = created["data"]["entity"]["id"].as_str().unwrap().to_string();

    // Legit patch.
    let res = client
        .patch(format!("{}/commands/update", server.base_url))
        .bearer_auth("tok")
        .json(&json!({"table": "tasks", "id": id, "fields": {"title": "renamed"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["data"]["entity"]["fields"]["title"], json!("renamed"));

    // Patch touching a protected field.
    let res = client
        .patch(format!("{}/commands/update", server.base_url))
        .bearer_auth("tok")
        .json(&json!({"table": "tasks", "id": id, "fields": {"ticket_number": 7}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"]["kind"], json!("protected_field"));
    assert_eq!(body["error"]["retryable"], json!(false));

    // Exactly two ledger events: create + rename, nothing for the rejection.
    let history = activity(&client, &server, "tok", "").await;
    assert_eq!(history["data"]["total"], json!(2));
}

#[tokio::test]
async fn workspace_isolation_answers_not_found() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("alice", WorkspaceId::new());
    server.issue_member("eve", WorkspaceId::new());

    let created =
        post_command(&client, &server, "alice", "create_task", json!({"title": "private"})).await;
    let created: JsonValue = created.json().await.unwrap();
    let id = created["data"]["entity"]["id"].as_str().unwrap().to_string();

    // A patch from another workspace neither succeeds nor confirms
    // existence.
    let res = client
        .patch(format!("{}/commands/update", server.base_url))
        .bearer_auth("eve")
        .json(&json!({"table": "tasks", "id": id, "fields": {"title": "mine now"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"]["kind"], json!("not_found"));

    // And the other workspace's ledger shows nothing.
    let history = activity(&client, &server, "eve", "").await;
    assert_eq!(history["data"]["total"], json!(0));
}

#[tokio::test]
async fn rate_limited_excess_gets_retry_after_and_accepted_work_completes() {
    let server = TestServer::spawn_with_budget(Some(3)).await;
    let client = reqwest::Client::new();
    server.issue_agent("agent-tok", WorkspaceId::new());

    let mut accepted = 0;
    let mut limited = 0;
    for i in 0..5 {
        let res = post_command(
            &client,
            &server,
            "agent-tok",
            "create_task",
            json!({"title": format!("t{i}")}),
        )
        .await;
        match res.status() {
            StatusCode::OK => accepted += 1,
            StatusCode::TOO_MANY_REQUESTS => {
                assert!(res.headers().contains_key(reqwest::header::RETRY_AFTER));
                let body: JsonValue = res.json().await.unwrap();
                assert_eq!(body["error"]["retryable"], json!(true));
                limited += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!((accepted, limited), (3, 2));

    let history = activity(&client, &server, "agent-tok", "").await;
    assert_eq!(history["data"]["total"], json!(3));
}

#[tokio::test]
async fn change_status_records_the_transition_and_filters_work() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("tok", WorkspaceId::new());

    let created = post_command(&client, &server, "tok", "create_task", json!({"title": "x"})).await;
    let created: JsonValue = created.json().await.unwrap();
    let id = created["data"]["entity"]["id"].as_str().unwrap().to_string();

    let res = post_command(
        &client,
        &server,
        "tok",
        "change_status",
        json!({"table": "tasks", "id": id, "status": "done"}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["data"]["event"]["payload"]["from"], json!("todo"));
    assert_eq!(body["data"]["event"]["payload"]["to"], json!("done"));

    let history = activity(
        &client,
        &server,
        "tok",
        "?event_type=task.status_changed",
    )
    .await;
    assert_eq!(history["data"]["total"], json!(1));

    let history = activity(&client, &server, "tok", &format!("?entity_id={id}")).await;
    assert_eq!(history["data"]["total"], json!(2));
}

#[tokio::test]
async fn unknown_action_and_bad_payload_are_validation_errors() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("tok", WorkspaceId::new());

    let res = post_command(&client, &server, "tok", "drop_workspace", json!({})).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = post_command(&client, &server, "tok", "create_task", json!({"title": ""})).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: JsonValue = res.json().await.unwrap();
    assert_eq!(body["error"]["kind"], json!("validation_error"));
}

#[tokio::test]
async fn tasks_get_sequential_ticket_numbers() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    server.issue_member("tok", WorkspaceId::new());

    for expected in 1..=2 {
        let res =
            post_command(&client, &server, "tok", "create_task", json!({"title": "t"})).await;
        let body: JsonValue = res.json().await.unwrap();
        assert_eq!(
            body["data"]["entity"]["fields"]["ticket_number"],
            json!(expected)
        );
    }
}

#[tokio::test]
async fn health_needs_no_credential() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
