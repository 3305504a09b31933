//! services/api/src/web/admin.rs
//!
//! Operator endpoints: the diagnostics overview and the kill-switch.

use axum::{
    extract::State,
    response::Json,
    Extension,
};
use chrono::{Duration, Utc};
use production_core::diagnostics::{
    self, context, count_abandoned, system_status, DiagnosticEntry, DiagnosticRecord,
    SystemStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::error::{ErrorBody, Rejection};
use crate::web::middleware::AdminUser;
use crate::web::state::AppState;

const RECENT_ERRORS: i64 = 50;
const FUNNEL_WINDOW_HOURS: i64 = 24;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub maintenance_mode: bool,
    #[schema(value_type = Object)]
    pub status: SystemStatus,
    /// Generations started in the last day that never reached an end.
    pub abandoned_sessions: usize,
    #[schema(value_type = Vec<Object>)]
    pub recent_errors: Vec<DiagnosticRecord>,
}

#[derive(Deserialize, ToSchema)]
pub struct KillSwitchRequest {
    pub enabled: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchResponse {
    pub maintenance_mode: bool,
}

/// Operational overview: status lights, abandoned generations, latest errors.
#[utoipa::path(
    get,
    path = "/api/admin/diagnostics",
    responses(
        (status = 200, description = "Diagnostics overview", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid credential"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn diagnostics_handler(
    State(app_state): State<Arc<AppState>>,
) -> Json<DiagnosticsResponse> {
    let now = Utc::now();

    let (recent_errors, database_reachable) =
        match app_state.db.recent_diagnostics(RECENT_ERRORS).await {
            Ok(records) => (records, true),
            Err(e) => {
                error!("Failed to read diagnostics: {:?}", e);
                (Vec::new(), false)
            }
        };

    let abandoned_sessions = match app_state
        .db
        .funnel_events_since(now - Duration::hours(FUNNEL_WINDOW_HOURS))
        .await
    {
        Ok(events) => count_abandoned(&events, now),
        Err(e) => {
            warn!("Failed to read funnel events: {:?}", e);
            0
        }
    };

    let maintenance_mode = app_state.db.maintenance_mode().await.unwrap_or_else(|e| {
        warn!("Failed to read maintenance flag: {:?}", e);
        false
    });

    Json(DiagnosticsResponse {
        maintenance_mode,
        status: system_status(&recent_errors, database_reachable, now),
        abandoned_sessions,
        recent_errors,
    })
}

/// Turn maintenance mode on or off. New submissions are refused while on.
#[utoipa::path(
    post,
    path = "/api/admin/kill-switch",
    request_body = KillSwitchRequest,
    responses(
        (status = 200, description = "New maintenance state", body = KillSwitchResponse),
        (status = 401, description = "Missing or invalid credential"),
        (status = 403, description = "Not an admin"),
        (status = 500, description = "Flag could not be written", body = ErrorBody)
    )
)]
pub async fn kill_switch_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(AdminUser(admin_id)): Extension<AdminUser>,
    Json(payload): Json<KillSwitchRequest>,
) -> Result<Json<KillSwitchResponse>, Rejection> {
    if let Err(e) = app_state.db.set_maintenance_mode(payload.enabled).await {
        let err = diagnostics::backend_failure(
            app_state.diagnostics.as_ref(),
            context::KILL_SWITCH,
            e,
        )
        .await;
        return Err(err.into());
    }

    let state = if payload.enabled { "ON" } else { "OFF" };
    info!(%admin_id, maintenance = payload.enabled, "Kill-switch toggled");
    diagnostics::report(
        app_state.diagnostics.as_ref(),
        DiagnosticEntry {
            device_info: format!("admin:{}", admin_id),
            error_message: format!("Maintenance mode {}", state),
            context: context::KILL_SWITCH.to_string(),
        },
    )
    .await;

    Ok(Json(KillSwitchResponse {
        maintenance_mode: payload.enabled,
    }))
}
