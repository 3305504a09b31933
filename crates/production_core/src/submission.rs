//! crates/production_core/src/submission.rs
//!
//! Turns a validated creation request into exactly one provider job and one
//! usage increment.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::diagnostics::{self, context, DiagnosticEntry};
use crate::domain::{JobPoll, SubmittedJob};
use crate::error::ProductionError;
use crate::policy::{QuotaDecision, QuotaPolicy, QuotaState, Verdict};
use crate::ports::{DatabaseService, DiagnosticsSink, FaceSwapProvider, PortError};

/// Message shown for any unexpected failure; the cause is only logged.
pub const GENERIC_BACKEND_MESSAGE: &str = "Something went wrong on our side. Please try again.";

const FACE_BUCKET: &str = "ia-faces";
const LEGACY_FACE_BUCKETS: &[&str] = &["avatars", "ia-faces"];

/// A creation request as sent by the client.
#[derive(Debug, Clone)]
pub struct CreateProduction {
    pub target_clip_url: String,
    pub prompt: String,
    pub category: String,
}

/// Who is asking. The bearer credential wins; the client-supplied id is
/// only used when the credential cannot be resolved.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub bearer: Option<String>,
    pub claimed_user_id: Option<Uuid>,
}

/// Rewrites a stored face reference to the canonical face bucket URL.
///
/// Accepts bare object paths, paths prefixed with a bucket name and public
/// URLs of either the legacy avatar bucket or the face bucket. Absolute URLs
/// pointing anywhere else are returned unchanged.
pub fn normalize_face_url(storage_base_url: &str, raw: &str) -> String {
    let base = storage_base_url.trim_end_matches('/');
    let public_root = format!("{}/storage/v1/object/public/", base);

    let mut path = raw.trim();
    if let Some(rest) = path.strip_prefix(public_root.as_str()) {
        path = rest;
    } else if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    for bucket in LEGACY_FACE_BUCKETS {
        if let Some(rest) = path.strip_prefix(&format!("{}/", bucket)) {
            path = rest;
            break;
        }
    }
    format!("{}{}/{}", public_root, FACE_BUCKET, path.trim_start_matches('/'))
}

pub struct ProductionService {
    db: Arc<dyn DatabaseService>,
    provider: Arc<dyn FaceSwapProvider>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    policy: QuotaPolicy,
    prompt_max_chars: usize,
    storage_base_url: String,
}

impl ProductionService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        provider: Arc<dyn FaceSwapProvider>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        policy: QuotaPolicy,
        prompt_max_chars: usize,
        storage_base_url: String,
    ) -> Self {
        Self {
            db,
            provider,
            diagnostics,
            policy,
            prompt_max_chars,
            storage_base_url,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    /// Resolves the caller, preferring the bearer credential.
    pub async fn resolve_identity(&self, identity: &Identity) -> Result<Uuid, ProductionError> {
        if let Some(token) = identity.bearer.as_deref().filter(|t| !t.is_empty()) {
            match self.db.resolve_bearer(token).await {
                Ok(user_id) => return Ok(user_id),
                Err(e) => warn!("Bearer resolution failed, trying claimed id: {:?}", e),
            }
        }
        identity.claimed_user_id.ok_or(ProductionError::Unauthorized)
    }

    /// Resolves the caller from the bearer credential only.
    pub async fn require_bearer(&self, bearer: Option<&str>) -> Result<Uuid, ProductionError> {
        let token = bearer
            .filter(|t| !t.is_empty())
            .ok_or(ProductionError::Unauthorized)?;
        self.db.resolve_bearer(token).await.map_err(|e| {
            warn!("Bearer resolution failed: {:?}", e);
            ProductionError::Unauthorized
        })
    }

    fn validate(&self, request: &CreateProduction) -> Result<(), ProductionError> {
        if request.target_clip_url.trim().is_empty() {
            return Err(ProductionError::InvalidInput(
                "A character clip is required".to_string(),
            ));
        }
        if request.prompt.chars().count() > self.prompt_max_chars {
            return Err(ProductionError::InvalidInput(format!(
                "The prompt must be at most {} characters",
                self.prompt_max_chars
            )));
        }
        Ok(())
    }

    async fn backend_failure(&self, context: &str, cause: impl std::fmt::Debug) -> ProductionError {
        diagnostics::backend_failure(self.diagnostics.as_ref(), context, cause).await
    }

    fn rejection(&self, decision: &QuotaDecision) -> Option<ProductionError> {
        match decision.verdict {
            Verdict::Allowed => None,
            Verdict::Maintenance => Some(ProductionError::ServiceUnavailable),
            Verdict::OutOfWindow => {
                let window = self.policy.window.unwrap_or(crate::policy::HourWindow::new(0, 24));
                Some(ProductionError::OutOfWindow {
                    start_hour: window.start_hour,
                    end_hour: window.end_hour,
                })
            }
            Verdict::Exhausted => Some(ProductionError::QuotaExceeded {
                limit: decision.daily_limit,
            }),
        }
    }

    /// Submits one face-swap job.
    ///
    /// Preconditions are checked in order and the first failure wins:
    /// input, identity, kill-switch, quota and window, face on file. The
    /// provider call always precedes the usage increment, so a failed call
    /// leaves the counter untouched.
    pub async fn submit(
        &self,
        request: &CreateProduction,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(Uuid, SubmittedJob), ProductionError> {
        self.validate(request)?;
        let user_id = self.resolve_identity(identity).await?;

        let maintenance = match self.db.maintenance_mode().await {
            Ok(flag) => flag,
            Err(e) => return Err(self.backend_failure(context::SUBMISSION, e).await),
        };
        if maintenance {
            return Err(ProductionError::ServiceUnavailable);
        }

        let profile = match self.db.get_profile(user_id).await {
            Ok(profile) => Some(profile),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(self.backend_failure(context::SUBMISSION, e).await),
        };
        let quota = profile.as_ref().map(|p| p.quota.clone()).unwrap_or_default();
        let decision = self.policy.evaluate(&quota, now, false);
        if let Some(rejection) = self.rejection(&decision) {
            info!(%user_id, code = rejection.code(), "Submission rejected by policy");
            return Err(rejection);
        }

        let face_url = profile
            .and_then(|p| p.face_url)
            .filter(|f| !f.trim().is_empty())
            .map(|f| normalize_face_url(&self.storage_base_url, &f))
            .ok_or(ProductionError::MissingFaceAsset)?;

        let job_id = match self
            .provider
            .submit(&request.target_clip_url, &face_url)
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(self.backend_failure(context::SUBMISSION, e).await),
        };
        info!(%user_id, %job_id, "Face-swap job created");

        let today = self.policy.today(now);
        match self
            .db
            .try_record_usage(user_id, today, self.policy.daily_limit)
            .await
        {
            Ok(Some(daily_count)) => Ok((user_id, SubmittedJob { job_id, daily_count })),
            Ok(None) => {
                warn!(%user_id, %job_id, "Concurrent submission consumed the last slot");
                diagnostics::report(
                    self.diagnostics.as_ref(),
                    DiagnosticEntry::server(
                        context::QUOTA_RACE,
                        format!("Job {} orphaned: daily limit reached concurrently", job_id),
                    ),
                )
                .await;
                Err(ProductionError::QuotaExceeded {
                    limit: self.policy.daily_limit,
                })
            }
            Err(e) => Err(self.backend_failure(context::QUOTA_UPDATE, e).await),
        }
    }

    /// Current quota decision for the creation view.
    pub async fn quota_status(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, ProductionError> {
        let maintenance = match self.db.maintenance_mode().await {
            Ok(enabled) => enabled,
            Err(e) => return Err(self.backend_failure(context::QUOTA_STATUS, e).await),
        };
        let quota = match self.db.get_profile(user_id).await {
            Ok(profile) => profile.quota,
            Err(PortError::NotFound(_)) => QuotaState::default(),
            Err(e) => return Err(self.backend_failure(context::QUOTA_STATUS, e).await),
        };
        Ok(self.policy.evaluate(&quota, now, maintenance))
    }

    /// Grants the daily invite bonus. Returns whether an attempt was given back.
    pub async fn redeem_invite_bonus(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, ProductionError> {
        let profile = match self.db.get_profile(user_id).await {
            Ok(profile) => profile,
            Err(PortError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(self.backend_failure(context::QUOTA_UPDATE, e).await),
        };
        let Some(updated) = profile.quota.grant_invite_bonus(self.policy.today(now)) else {
            return Ok(false);
        };
        if let Err(e) = self.db.save_quota(user_id, &updated).await {
            return Err(self.backend_failure(context::QUOTA_UPDATE, e).await);
        }
        info!(%user_id, daily_count = updated.daily_count, "Invite bonus granted");
        Ok(true)
    }

    /// Provider status proxy.
    pub async fn job_status(&self, job_id: &str) -> Result<JobPoll, ProductionError> {
        if job_id.trim().is_empty() {
            return Err(ProductionError::InvalidInput("Missing job id".to_string()));
        }
        match self.provider.poll(job_id).await {
            Ok(poll) => Ok(poll),
            Err(e) => Err(self.backend_failure(context::POLLING, e).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDatabase, RecordingDiagnostics, ScriptedProvider};
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, TimeZone};

    const BASE: &str = "https://backend.test";

    // 14:00 in Rome.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    struct Harness {
        db: Arc<FakeDatabase>,
        provider: Arc<ScriptedProvider>,
        diagnostics: Arc<RecordingDiagnostics>,
        service: ProductionService,
        user: Uuid,
    }

    fn harness(limit: u32) -> Harness {
        let db = Arc::new(FakeDatabase::default());
        let provider = Arc::new(ScriptedProvider::default());
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let policy = QuotaPolicy::new(
            limit,
            Some(crate::policy::HourWindow::new(8, 23)),
            chrono_tz::Europe::Rome,
        );
        let service = ProductionService::new(
            db.clone(),
            provider.clone(),
            diagnostics.clone(),
            policy,
            150,
            BASE.to_string(),
        );
        let user = Uuid::new_v4();
        db.insert_profile(user, Some("u1/face.jpg"), QuotaState::default());
        db.insert_token("token", user);
        Harness {
            db,
            provider,
            diagnostics,
            service,
            user,
        }
    }

    fn request() -> CreateProduction {
        CreateProduction {
            target_clip_url: "https://backend.test/clips/hero.mp4".into(),
            prompt: "POV: the bell rings".into(),
            category: "action".into(),
        }
    }

    fn bearer() -> Identity {
        Identity {
            bearer: Some("token".into()),
            claimed_user_id: None,
        }
    }

    #[tokio::test]
    async fn third_video_allowed_fourth_rejected() {
        let h = harness(3);
        h.db.set_quota(
            h.user,
            QuotaState {
                daily_count: 2,
                last_count_date: Some(today()),
                last_bonus_date: None,
            },
        );

        let (_, job) = h.service.submit(&request(), &bearer(), now()).await.unwrap();
        assert_eq!(job.daily_count, 3);
        assert_eq!(h.db.quota(h.user).daily_count, 3);

        let err = h.service.submit(&request(), &bearer(), now()).await.unwrap_err();
        assert_eq!(err, ProductionError::QuotaExceeded { limit: 3 });
        assert_eq!(h.provider.submissions().len(), 1);
    }

    #[tokio::test]
    async fn yesterday_counter_is_reset() {
        let h = harness(3);
        h.db.set_quota(
            h.user,
            QuotaState {
                daily_count: 5,
                last_count_date: today().pred_opt(),
                last_bonus_date: None,
            },
        );
        let (_, job) = h.service.submit(&request(), &bearer(), now()).await.unwrap();
        assert_eq!(job.daily_count, 1);
        assert_eq!(h.db.quota(h.user).last_count_date, Some(today()));
    }

    #[tokio::test]
    async fn failed_provider_call_leaves_counter_untouched() {
        let h = harness(3);
        h.provider.fail_submissions();
        let err = h.service.submit(&request(), &bearer(), now()).await.unwrap_err();
        assert_matches!(err, ProductionError::Backend(_));
        assert_eq!(h.db.usage_writes(), 0);
        assert_eq!(h.db.quota(h.user), QuotaState::default());
        assert_eq!(h.diagnostics.errors()[0].context, context::SUBMISSION);
    }

    #[tokio::test]
    async fn provider_receives_clip_as_source_and_face_as_target() {
        let h = harness(3);
        h.service.submit(&request(), &bearer(), now()).await.unwrap();
        let (source, target) = h.provider.submissions()[0].clone();
        assert_eq!(source, "https://backend.test/clips/hero.mp4");
        assert_eq!(
            target,
            "https://backend.test/storage/v1/object/public/ia-faces/u1/face.jpg"
        );
    }

    #[tokio::test]
    async fn preconditions_fail_in_order() {
        let h = harness(3);

        let mut bad = request();
        bad.target_clip_url.clear();
        let anonymous = Identity::default();
        assert_matches!(
            h.service.submit(&bad, &anonymous, now()).await,
            Err(ProductionError::InvalidInput(_))
        );

        assert_matches!(
            h.service.submit(&request(), &anonymous, now()).await,
            Err(ProductionError::Unauthorized)
        );

        h.db.set_maintenance(true);
        assert_matches!(
            h.service.submit(&request(), &bearer(), now()).await,
            Err(ProductionError::ServiceUnavailable)
        );
        h.db.set_maintenance(false);

        let night = Utc.with_ymd_and_hms(2026, 10, 19, 22, 30, 0).unwrap();
        assert_matches!(
            h.service.submit(&request(), &bearer(), night).await,
            Err(ProductionError::OutOfWindow {
                start_hour: 8,
                end_hour: 23
            })
        );

        h.db.clear_face(h.user);
        assert_matches!(
            h.service.submit(&request(), &bearer(), now()).await,
            Err(ProductionError::MissingFaceAsset)
        );
        assert!(h.provider.submissions().is_empty());
    }

    #[tokio::test]
    async fn overlong_prompt_is_invalid() {
        let h = harness(3);
        let mut long = request();
        long.prompt = "x".repeat(151);
        assert_matches!(
            h.service.submit(&long, &bearer(), now()).await,
            Err(ProductionError::InvalidInput(_))
        );
    }

    #[tokio::test]
    async fn empty_prompt_is_accepted() {
        let h = harness(3);
        let mut silent = request();
        silent.prompt = String::new();
        let (_, job) = h.service.submit(&silent, &bearer(), now()).await.unwrap();
        assert_eq!(job.daily_count, 1);
        assert_eq!(h.provider.submissions().len(), 1);
    }

    #[tokio::test]
    async fn quota_status_hides_database_errors() {
        let h = harness(3);
        h.db.fail_config_reads();
        let err = h.service.quota_status(h.user, now()).await.unwrap_err();
        assert_eq!(err, ProductionError::Backend(GENERIC_BACKEND_MESSAGE.to_string()));
        let logged = h.diagnostics.errors();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].context, context::QUOTA_STATUS);
        assert!(logged[0].error_message.contains("pool timed out"));
    }

    #[tokio::test]
    async fn claimed_identity_is_used_when_bearer_fails() {
        let h = harness(3);
        let identity = Identity {
            bearer: Some("expired".into()),
            claimed_user_id: Some(h.user),
        };
        let (user, _) = h.service.submit(&request(), &identity, now()).await.unwrap();
        assert_eq!(user, h.user);
    }

    #[tokio::test]
    async fn lost_race_reports_quota_exceeded() {
        let h = harness(3);
        h.db.reject_usage_updates();
        let err = h.service.submit(&request(), &bearer(), now()).await.unwrap_err();
        assert_eq!(err, ProductionError::QuotaExceeded { limit: 3 });
        assert_eq!(h.diagnostics.errors()[0].context, context::QUOTA_RACE);
    }

    #[tokio::test]
    async fn invite_bonus_gives_back_one_attempt_per_day() {
        let h = harness(2);
        h.db.set_quota(
            h.user,
            QuotaState {
                daily_count: 2,
                last_count_date: Some(today()),
                last_bonus_date: None,
            },
        );
        assert!(h.service.redeem_invite_bonus(h.user, now()).await.unwrap());
        assert!(!h.service.redeem_invite_bonus(h.user, now()).await.unwrap());
        let status = h.service.quota_status(h.user, now()).await.unwrap();
        assert_eq!(status.effective_count, 1);
        assert!(status.allowed());
    }

    #[test]
    fn face_urls_are_forced_onto_the_face_bucket() {
        let expected = "https://backend.test/storage/v1/object/public/ia-faces/u1/f.jpg";
        for raw in [
            "u1/f.jpg",
            "avatars/u1/f.jpg",
            "ia-faces/u1/f.jpg",
            "https://backend.test/storage/v1/object/public/avatars/u1/f.jpg",
            "https://backend.test/storage/v1/object/public/ia-faces/u1/f.jpg",
        ] {
            assert_eq!(normalize_face_url(BASE, raw), expected, "raw = {raw}");
        }
        assert_eq!(
            normalize_face_url(BASE, "https://elsewhere.test/f.jpg"),
            "https://elsewhere.test/f.jpg"
        );
    }
}
