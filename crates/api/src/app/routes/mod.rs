//! HTTP routes, one file per surface area.

use axum::Router;

pub mod activity;
pub mod commands;
pub mod stream;
pub mod system;

/// All protected routes (bearer credential required).
pub fn router() -> Router {
    Router::new()
        .merge(commands::router())
        .merge(activity::router())
        .merge(stream::router())
}
