//! Command submission: named actions and generic field patches.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{patch, post},
    Json, Router,
};
use serde_json::Value as JsonValue;

use agentbase_core::{Command, FieldPatch, NamedCommand};

use crate::app::{errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/commands/update", patch(submit_patch))
        .route("/commands/:action", post(submit_named))
}

/// POST /commands/{action}
///
/// Body: action-specific fields plus optional `idempotency_key`.
pub async fn submit_named(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Path(action): Path<String>,
    Json(body): Json<JsonValue>,
) -> axum::response::Response {
    let (command, idempotency_key) = match NamedCommand::parse(&action, body) {
        Ok(parsed) => parsed,
        Err(e) => return errors::command_error_to_response(e),
    };

    match services
        .execute(
            ctx.actor(),
            Command::Named {
                command,
                idempotency_key,
            },
        )
        .await
    {
        Ok(receipt) => errors::success(StatusCode::OK, receipt.data),
        Err(e) => errors::command_error_to_response(e),
    }
}

/// PATCH /commands/update
///
/// Body: `{table, id, fields, idempotency_key?}`. The table must be on the
/// allow-list and no field may be protected; both checks happen before any
/// write is attempted.
pub async fn submit_patch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Json(body): Json<FieldPatch>,
) -> axum::response::Response {
    match services.execute(ctx.actor(), Command::Patch(body)).await {
        Ok(receipt) => errors::success(StatusCode::OK, receipt.data),
        Err(e) => errors::command_error_to_response(e),
    }
}
