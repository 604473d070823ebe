//! Consistent error responses.
//!
//! Every failure serializes to the same machine-readable shape. Internal
//! distinctions the store keeps (absent row vs cross-workspace row) were
//! already collapsed to `NotFound` upstream; nothing here reintroduces
//! them.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;

use agentbase_core::CommandError;

pub fn command_error_to_response(err: CommandError) -> axum::response::Response {
    let status = match &err {
        CommandError::Unauthenticated => StatusCode::UNAUTHORIZED,
        CommandError::NoWorkspace => StatusCode::FORBIDDEN,
        CommandError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        CommandError::Validation(_) => StatusCode::BAD_REQUEST,
        CommandError::ProtectedField(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CommandError::NotFound => StatusCode::NOT_FOUND,
        CommandError::Conflict(_) => StatusCode::CONFLICT,
        CommandError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = axum::Json(json!({
        "success": false,
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
            "retryable": err.retryable(),
        },
    }));

    if let CommandError::RateLimited { retry_after_secs } = err {
        (
            status,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            body,
        )
            .into_response()
    } else {
        (status, body).into_response()
    }
}

pub fn success(status: StatusCode, data: serde_json::Value) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": true,
            "data": data,
        })),
    )
        .into_response()
}
