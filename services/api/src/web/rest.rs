//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI document.

use crate::error::{ErrorBody, Rejection};
use crate::web::admin::{DiagnosticsResponse, KillSwitchRequest, KillSwitchResponse};
use crate::web::auth::{bearer_token, client_key, client_key_or_issue};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use production_core::diagnostics::{self, context, DiagnosticEntry};
use production_core::domain::{JobStatus, Visibility};
use production_core::session::PendingSession;
use production_core::{
    classify_prompt, CreateProduction, Identity, ProductionError, PublishRequest, Verdict,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        face_swap_handler,
        job_status_handler,
        current_production_handler,
        discard_production_handler,
        save_video_handler,
        classify_text_handler,
        quota_handler,
        invite_bonus_handler,
        crate::web::admin::diagnostics_handler,
        crate::web::admin::kill_switch_handler,
        health_handler,
    ),
    components(
        schemas(
            FaceSwapRequest, FaceSwapResponse, JobStatusResponse, PendingProductionView,
            SaveVideoRequest, SaveVideoResponse, ClassifyRequest, ClassifyResponse,
            QuotaResponse, InviteBonusResponse, DiagnosticsResponse, KillSwitchRequest,
            KillSwitchResponse, ErrorBody
        )
    ),
    tags(
        (name = "Production API", description = "Face-swap submission, tracking and publication.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaceSwapRequest {
    /// Character clip the face is swapped into.
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub category: String,
    /// Only used when the bearer credential cannot be resolved.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaceSwapResponse {
    pub prediction_id: String,
    pub daily_count: u32,
    pub remaining: u32,
}

#[derive(Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub id: String,
    #[schema(value_type = String)]
    pub status: JobStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingProductionView {
    pub job_id: String,
    pub target_clip_url: String,
    pub prompt: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub final_artifact_url: Option<String>,
}

impl From<PendingSession> for PendingProductionView {
    fn from(s: PendingSession) -> Self {
        Self {
            job_id: s.job_id,
            target_clip_url: s.target_clip_url,
            prompt: s.prompt,
            category: s.category,
            created_at: s.created_at,
            final_artifact_url: s.final_artifact_url,
        }
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveVideoRequest {
    /// Defaults to the artifact recorded on the pending production.
    #[serde(default)]
    pub video_url: Option<String>,
    /// `pubblico` or `privato`.
    #[schema(value_type = String)]
    pub status: Visibility,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Serialize, ToSchema)]
pub struct SaveVideoResponse {
    pub success: bool,
    pub id: Uuid,
    pub url: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_couple_mode: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ClassifyResponse {
    pub category: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub daily_count: u32,
    pub daily_limit: u32,
    pub remaining: u32,
    pub allowed: bool,
    /// `allowed`, `maintenance`, `out_of_window` or `exhausted`.
    pub verdict: String,
}

#[derive(Serialize, ToSchema)]
pub struct InviteBonusResponse {
    pub granted: bool,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Start a face-swap production.
///
/// Checks input, identity, the kill-switch, quota and window, and the face on
/// file, in that order. On success the job is remembered as the client's
/// pending production.
#[utoipa::path(
    post,
    path = "/api/face-swap",
    request_body = FaceSwapRequest,
    responses(
        (status = 200, description = "Job created", body = FaceSwapResponse),
        (status = 400, description = "Missing or invalid fields", body = ErrorBody),
        (status = 401, description = "No resolvable identity", body = ErrorBody),
        (status = 403, description = "Outside the production window", body = ErrorBody),
        (status = 404, description = "No face photo on file", body = ErrorBody),
        (status = 429, description = "Daily limit reached", body = ErrorBody),
        (status = 500, description = "Provider or database failure", body = ErrorBody),
        (status = 503, description = "Maintenance mode", body = ErrorBody)
    )
)]
pub async fn face_swap_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<FaceSwapRequest>,
) -> Result<Response, Rejection> {
    let identity = Identity {
        bearer: bearer_token(&headers),
        claimed_user_id: payload.user_id,
    };
    let request = CreateProduction {
        target_clip_url: payload.video_url,
        prompt: payload.prompt,
        category: payload.category,
    };
    let now = Utc::now();
    let (user_id, job) = app_state.production.submit(&request, &identity, now).await?;

    let (key, cookie) = client_key_or_issue(&headers);
    app_state.tracker.forget(&key);
    let pending = PendingSession {
        job_id: job.job_id.clone(),
        target_clip_url: request.target_clip_url,
        prompt: request.prompt,
        category: request.category,
        created_at: now,
        final_artifact_url: None,
    };
    if let Err(e) = app_state.sessions.save(&key, &pending).await {
        // The job exists either way; the client still gets its id.
        error!(client_key = %key, "Failed to persist pending production: {:?}", e);
        diagnostics::report(
            app_state.diagnostics.as_ref(),
            DiagnosticEntry::server(context::SESSION, format!("{:?}", e)),
        )
        .await;
    }
    info!(%user_id, job_id = %job.job_id, "Production submitted");

    let limit = app_state.production.policy().daily_limit;
    let mut response = Json(FaceSwapResponse {
        prediction_id: job.job_id,
        daily_count: job.daily_count,
        remaining: limit.saturating_sub(job.daily_count),
    })
    .into_response();
    if let Some(cookie) = cookie {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Provider status of one job.
#[utoipa::path(
    get,
    path = "/api/face-swap/{job_id}",
    params(("job_id" = String, Path, description = "Provider job id")),
    responses(
        (status = 200, description = "Current job status", body = JobStatusResponse),
        (status = 500, description = "Provider failure", body = ErrorBody)
    )
)]
pub async fn job_status_handler(
    State(app_state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, Rejection> {
    let poll = app_state.production.job_status(&job_id).await?;
    Ok(Json(JobStatusResponse {
        id: job_id,
        status: poll.status,
        output: poll.output_url,
        error: poll.failure.map(|f| f.message),
    }))
}

/// The client's pending production, if still fresh.
#[utoipa::path(
    get,
    path = "/api/productions/current",
    responses(
        (status = 200, description = "Fresh pending production", body = PendingProductionView),
        (status = 410, description = "Absent or expired", body = ErrorBody)
    )
)]
pub async fn current_production_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PendingProductionView>, Rejection> {
    let key = client_key(&headers).ok_or(ProductionError::StaleSession)?;
    let session = app_state
        .sessions
        .load_fresh(&key, Utc::now(), app_state.diagnostics.as_ref())
        .await?;
    Ok(Json(session.into()))
}

/// Discard the pending production ("new take").
#[utoipa::path(
    delete,
    path = "/api/productions/current",
    responses((status = 204, description = "Slot cleared"))
)]
pub async fn discard_production_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, Rejection> {
    if let Some(key) = client_key(&headers) {
        app_state.tracker.forget(&key);
        if let Err(e) = app_state.sessions.clear(&key).await {
            let err = diagnostics::backend_failure(
                app_state.diagnostics.as_ref(),
                context::SESSION,
                e,
            )
            .await;
            return Err(err.into());
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Publish the finished video.
#[utoipa::path(
    post,
    path = "/api/save-video",
    request_body = SaveVideoRequest,
    responses(
        (status = 200, description = "Video stored and recorded", body = SaveVideoResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorBody),
        (status = 500, description = "Publication failed; the pending production is kept", body = ErrorBody)
    )
)]
pub async fn save_video_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SaveVideoRequest>,
) -> Result<Json<SaveVideoResponse>, Rejection> {
    let user_id = app_state
        .production
        .require_bearer(bearer_token(&headers).as_deref())
        .await?;
    let key = client_key(&headers).unwrap_or_default();
    let request = PublishRequest {
        artifact_url: payload.video_url,
        visibility: payload.status,
        caption: payload.prompt,
        category: payload.category,
    };
    let video = app_state
        .publication
        .publish(user_id, &key, request, Utc::now())
        .await?;
    // The slot is gone, so the cached tracker result has nothing left to serve.
    if !key.is_empty() {
        app_state.tracker.forget(&key);
    }
    Ok(Json(SaveVideoResponse {
        success: true,
        id: video.id,
        url: video.video_url,
    }))
}

/// Categorise a prompt. Never fails; unknown cases get the fallback category.
#[utoipa::path(
    post,
    path = "/api/classify-text",
    request_body = ClassifyRequest,
    responses((status = 200, description = "Chosen category", body = ClassifyResponse))
)]
pub async fn classify_text_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ClassifyRequest>,
) -> Json<ClassifyResponse> {
    let category = classify_prompt(
        app_state.classifier.as_deref(),
        &payload.text,
        payload.is_couple_mode,
    )
    .await;
    Json(ClassifyResponse {
        category: category.as_str().to_string(),
    })
}

/// Today's usage for the caller.
#[utoipa::path(
    get,
    path = "/api/quota",
    responses(
        (status = 200, description = "Quota decision", body = QuotaResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorBody)
    )
)]
pub async fn quota_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<QuotaResponse>, Rejection> {
    let user_id = app_state
        .production
        .require_bearer(bearer_token(&headers).as_deref())
        .await?;
    let decision = app_state
        .production
        .quota_status(user_id, Utc::now())
        .await?;
    let verdict = match decision.verdict {
        Verdict::Allowed => "allowed",
        Verdict::Maintenance => "maintenance",
        Verdict::OutOfWindow => "out_of_window",
        Verdict::Exhausted => "exhausted",
    };
    Ok(Json(QuotaResponse {
        daily_count: decision.effective_count,
        daily_limit: decision.daily_limit,
        remaining: decision.remaining(),
        allowed: decision.allowed(),
        verdict: verdict.to_string(),
    }))
}

/// Give back one attempt after an invite, once per day.
#[utoipa::path(
    post,
    path = "/api/quota/invite-bonus",
    responses(
        (status = 200, description = "Whether an attempt was given back", body = InviteBonusResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorBody)
    )
)]
pub async fn invite_bonus_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<InviteBonusResponse>, Rejection> {
    let user_id = app_state
        .production
        .require_bearer(bearer_token(&headers).as_deref())
        .await?;
    let granted = app_state
        .production
        .redeem_invite_bonus(user_id, Utc::now())
        .await?;
    Ok(Json(InviteBonusResponse { granted }))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
