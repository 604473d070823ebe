//! Ledger read path.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    routing::get,
    Router,
};

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route("/activity", get(query_activity))
}

/// GET /activity
///
/// Paginated ledger query with entity/actor/event-type/date filters,
/// implicitly scoped to the calling actor's workspace. There is no
/// parameter that could widen the scope.
pub async fn query_activity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Query(query): Query<dto::ActivityQuery>,
) -> axum::response::Response {
    let (filter, page) = match query.into_filter_and_page() {
        Ok(parsed) => parsed,
        Err(e) => return errors::command_error_to_response(e),
    };

    match services.query_ledger(ctx.actor(), &filter, page).await {
        Ok(result) => errors::success(
            StatusCode::OK,
            serde_json::json!({
                "events": result.events.iter().map(|e| e.to_json()).collect::<Vec<_>>(),
                "total": result.total,
                "has_more": result.has_more,
            }),
        ),
        Err(e) => errors::command_error_to_response(e),
    }
}
