//! Bearer-credential middleware.
//!
//! Every mutation and query route requires the bearer credential on every
//! call, including interactive clients. There is no cookie or session path
//! for mutations, which removes cross-site request forgery on this surface
//! by construction.

use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use agentbase_auth::{ActorResolver, AuthError, Credential};
use agentbase_core::CommandError;

use crate::app::errors;
use crate::context::ActorContext;

#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<ActorResolver>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| errors::command_error_to_response(CommandError::Unauthenticated))?;

    let actor = state
        .resolver
        .resolve(&Credential::new(token))
        .await
        .map_err(|e: AuthError| errors::command_error_to_response(e.into()))?;

    req.extensions_mut().insert(ActorContext::new(actor));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
