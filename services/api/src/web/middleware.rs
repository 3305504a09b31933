//! services/api/src/web/middleware.rs
//!
//! Route guards: admin authentication and the pending-production redirect.

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use production_core::session::SessionSlot;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::web::auth::{bearer_token, client_key};
use crate::web::state::AppState;

/// Identity of an authenticated admin, inserted into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub uuid::Uuid);

/// Middleware that validates the bearer credential and requires `is_admin`.
///
/// If valid, inserts the admin's id into request extensions for handlers to use.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract the bearer credential
    let token = bearer_token(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Resolve it to a user
    let user_id = state.db.resolve_bearer(&token).await.map_err(|e| {
        warn!("Failed to resolve admin credential: {:?}", e);
        StatusCode::UNAUTHORIZED
    })?;

    // 3. Check the admin flag on the profile
    let profile = state.db.get_profile(user_id).await.map_err(|e| {
        error!("Failed to load admin profile: {:?}", e);
        StatusCode::FORBIDDEN
    })?;
    if !profile.is_admin {
        return Err(StatusCode::FORBIDDEN);
    }

    // 4. Continue to the handler
    req.extensions_mut().insert(AdminUser(user_id));
    Ok(next.run(req).await)
}

/// Pulls a navigation back to the tracker view while the client has a fresh
/// pending production. Only page navigations (GET) are considered.
pub async fn magnet_redirect(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::GET || state.guard.is_exempt(req.uri().path()) {
        return next.run(req).await;
    }
    let Some(key) = client_key(req.headers()) else {
        return next.run(req).await;
    };

    let pending = match state.sessions.slot(&key).await {
        Ok(SessionSlot::Pending(session)) => Some(session),
        Ok(SessionSlot::Empty) => None,
        Err(e) => {
            warn!("Could not read pending session for redirect: {:?}", e);
            None
        }
    };

    match state
        .guard
        .redirect_for(req.uri().path(), pending.as_ref(), Utc::now())
    {
        Some(target) => {
            debug!(from = %req.uri().path(), to = %target, "Redirecting to pending production");
            Redirect::temporary(&target).into_response()
        }
        None => next.run(req).await,
    }
}
