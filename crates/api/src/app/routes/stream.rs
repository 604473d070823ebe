//! Realtime subscription endpoint (Server-Sent Events).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::app::{dto, errors, services::AppServices};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new().route("/stream", get(stream_changes))
}

/// GET /stream
///
/// Long-lived SSE feed of committed changes, keyed by the caller's
/// resolved workspace. The optional entity filter narrows within that
/// workspace; it can never widen it. Dropping the connection drops the
/// broadcast receiver, which is the unsubscribe.
pub async fn stream_changes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ActorContext>,
    Query(query): Query<dto::StreamQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => return errors::command_error_to_response(e),
    };

    let rx = services.subscribe(ctx.actor().workspace_id);

    let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(notice) if filter.matches(&notice) => {
            match SseEvent::default().event("change").json_data(&notice) {
                Ok(event) => Some(Ok::<SseEvent, Infallible>(event)),
                Err(e) => {
                    tracing::warn!("failed to serialize change notice: {e}");
                    None
                }
            }
        }
        // Filtered out, or the receiver lagged past the buffer. Delivery
        // is at-least-once; a gapped subscriber re-fetches current state.
        Ok(_) => None,
        Err(_) => Some(Ok(SseEvent::default().event("gap").data("{}"))),
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
