pub mod admin;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;

use admin::{diagnostics_handler, kill_switch_handler};
use middleware::{magnet_redirect, require_admin};
use rest::{
    classify_text_handler, current_production_handler, discard_production_handler,
    face_swap_handler, health_handler, invite_bonus_handler, job_status_handler, quota_handler,
    save_video_handler,
};
use state::AppState;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use ws_handler::ws_handler;

/// Builds the full application router: the production API, the admin routes,
/// the tracker socket and the static front-end behind the redirect guard.
pub fn router(app_state: Arc<AppState>, static_dir: &Path) -> Router {
    // Public routes (identity is resolved per handler)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/api/face-swap", post(face_swap_handler))
        .route("/api/face-swap/{job_id}", get(job_status_handler))
        .route(
            "/api/productions/current",
            get(current_production_handler).delete(discard_production_handler),
        )
        .route("/api/save-video", post(save_video_handler))
        .route("/api/classify-text", post(classify_text_handler))
        .route("/api/quota", get(quota_handler))
        .route("/api/quota/invite-bonus", post(invite_bonus_handler))
        .route("/ws/tracker", get(ws_handler));

    // Admin routes (admin flag required)
    let admin_routes = Router::new()
        .route("/api/admin/diagnostics", get(diagnostics_handler))
        .route("/api/admin/kill-switch", post(kill_switch_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_admin,
        ));

    // Page navigations fall through to the static front-end
    let frontend = Router::new()
        .fallback_service(ServeDir::new(static_dir))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            magnet_redirect,
        ));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(app_state)
        .merge(frontend)
}
