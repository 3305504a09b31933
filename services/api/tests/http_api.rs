mod common;

use axum::http::{header, StatusCode};
use chrono::{Duration, Utc};
use common::{body_json, cookie_key, empty_request, json_request, TestApp, ADMIN_TOKEN, TOKEN};
use production_core::diagnostics::{context, DiagnosticRecord, FunnelEvent, FunnelStep};
use production_core::submission::GENERIC_BACKEND_MESSAGE;
use production_core::Category;

#[tokio::test]
async fn submission_creates_job_and_pending_production() {
    let app = TestApp::spawn();

    let (response, cookie) = app.submit("azione").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie.expect("client cookie issued");
    assert!(cookie.starts_with("deep_client="));
    let body = body_json(response).await;
    assert_eq!(body["predictionId"], "job-1");
    assert_eq!(body["dailyCount"], 1);
    assert_eq!(body["remaining"], 1);

    // Clip is the source, the normalised face is the target.
    let submissions = app.provider.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "https://clips.test/hero.mp4");
    assert_eq!(
        submissions[0].1,
        "https://backend.test/storage/v1/object/public/ia-faces/user/face.jpg"
    );

    let current = app
        .send(empty_request("GET", "/api/productions/current", None, Some(&cookie)))
        .await;
    assert_eq!(current.status(), StatusCode::OK);
    let session = body_json(current).await;
    assert_eq!(session["jobId"], "job-1");
    assert_eq!(session["category"], "azione");
}

#[tokio::test]
async fn exhausted_quota_is_rejected_without_calling_provider() {
    let app = TestApp::spawn();
    app.set_used_today(2);

    let (response, _) = app.submit("azione").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"], "quota_exceeded");
    assert!(app.provider.submissions().is_empty());
    assert_eq!(app.db.usage_writes(), 0);
}

#[tokio::test]
async fn precondition_failures_map_to_distinct_statuses() {
    let app = TestApp::spawn();

    let anonymous = app
        .send(json_request(
            "POST",
            "/api/face-swap",
            None,
            None,
            serde_json::json!({ "videoUrl": "https://clips.test/a.mp4", "prompt": "p", "category": "azione" }),
        ))
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let missing_clip = app
        .send(json_request(
            "POST",
            "/api/face-swap",
            Some(TOKEN),
            None,
            serde_json::json!({ "prompt": "p", "category": "azione" }),
        ))
        .await;
    assert_eq!(missing_clip.status(), StatusCode::BAD_REQUEST);

    app.db.clear_face(app.user_id);
    let (no_face, _) = app.submit("azione").await;
    assert_eq!(no_face.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(no_face).await["error"], "missing_face_asset");
}

#[tokio::test]
async fn provider_failure_is_generic_and_leaves_quota_alone() {
    let app = TestApp::spawn();
    app.provider.fail_submissions();

    let (response, _) = app.submit("azione").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "backend_error");
    assert!(!body["message"].as_str().unwrap().contains("provider rejected"));
    assert_eq!(app.db.usage_writes(), 0);
    assert_eq!(app.diagnostics.errors().len(), 1);
}

#[tokio::test]
async fn kill_switch_blocks_new_submissions() {
    let app = TestApp::spawn();

    let toggled = app
        .send(json_request(
            "POST",
            "/api/admin/kill-switch",
            Some(ADMIN_TOKEN),
            None,
            serde_json::json!({ "enabled": true }),
        ))
        .await;
    assert_eq!(toggled.status(), StatusCode::OK);
    assert_eq!(body_json(toggled).await["maintenanceMode"], true);
    assert!(app
        .diagnostics
        .errors()
        .iter()
        .any(|e| e.context == context::KILL_SWITCH));

    let (response, _) = app.submit("azione").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.provider.submissions().is_empty());
}

#[tokio::test]
async fn admin_routes_require_an_admin() {
    let app = TestApp::spawn();

    let anonymous = app
        .send(empty_request("GET", "/api/admin/diagnostics", None, None))
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let user = app
        .send(empty_request("GET", "/api/admin/diagnostics", Some(TOKEN), None))
        .await;
    assert_eq!(user.status(), StatusCode::FORBIDDEN);

    let admin = app
        .send(empty_request("GET", "/api/admin/diagnostics", Some(ADMIN_TOKEN), None))
        .await;
    assert_eq!(admin.status(), StatusCode::OK);
    let body = body_json(admin).await;
    assert_eq!(body["maintenanceMode"], false);
    assert_eq!(body["abandonedSessions"], 0);
    assert_eq!(body["status"]["database"], "online");
}

#[tokio::test]
async fn admin_diagnostics_reflect_recent_activity() {
    let app = TestApp::spawn();
    let now = Utc::now();
    let started = |session: &str, minutes_ago: i64| FunnelEvent {
        session_id: session.to_string(),
        step: FunnelStep::VideoStart,
        created_at: now - Duration::minutes(minutes_ago),
    };
    app.db.push_funnel(started("walked-away", 10));
    app.db.push_funnel(started("finished", 10));
    app.db.push_funnel(FunnelEvent {
        session_id: "finished".to_string(),
        step: FunnelStep::VideoReady,
        created_at: now - Duration::minutes(8),
    });
    app.db.push_funnel(started("still-running", 1));
    app.db.push_diagnostic(DiagnosticRecord {
        id: 1,
        device_info: "API_Server".to_string(),
        error_message: "Unexpected status 502".to_string(),
        context: context::SUBMISSION.to_string(),
        created_at: now - Duration::minutes(2),
    });
    // Too old to affect the lights.
    app.db.push_diagnostic(DiagnosticRecord {
        id: 2,
        device_info: "API_Server".to_string(),
        error_message: "bucket unavailable".to_string(),
        context: context::STORAGE.to_string(),
        created_at: now - Duration::hours(2),
    });

    let response = app
        .send(empty_request("GET", "/api/admin/diagnostics", Some(ADMIN_TOKEN), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["abandonedSessions"], 1);
    assert_eq!(body["status"]["database"], "online");
    assert_eq!(body["status"]["provider"], "error");
    assert_eq!(body["status"]["storage"], "online");
    let errors = body["recentErrors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["context"], context::SUBMISSION);
}

#[tokio::test]
async fn quota_endpoint_hides_database_errors() {
    let app = TestApp::spawn();
    app.db.fail_config_reads();

    let response = app
        .send(empty_request("GET", "/api/quota", Some(TOKEN), None))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "backend_error");
    assert_eq!(body["message"], GENERIC_BACKEND_MESSAGE);
    assert!(app
        .diagnostics
        .errors()
        .iter()
        .any(|e| e.context == context::QUOTA_STATUS));
}

#[tokio::test]
async fn quota_endpoint_reports_remaining_attempts() {
    let app = TestApp::spawn();
    app.set_used_today(1);

    let anonymous = app.send(empty_request("GET", "/api/quota", None, None)).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(empty_request("GET", "/api/quota", Some(TOKEN), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["dailyCount"], 1);
    assert_eq!(body["remaining"], 1);
    assert_eq!(body["verdict"], "allowed");
}

#[tokio::test]
async fn invite_bonus_is_granted_once_per_day() {
    let app = TestApp::spawn();
    app.set_used_today(2);

    let first = app
        .send(empty_request("POST", "/api/quota/invite-bonus", Some(TOKEN), None))
        .await;
    assert_eq!(body_json(first).await["granted"], true);
    let second = app
        .send(empty_request("POST", "/api/quota/invite-bonus", Some(TOKEN), None))
        .await;
    assert_eq!(body_json(second).await["granted"], false);
    assert_eq!(app.db.quota(app.user_id).daily_count, 1);
}

#[tokio::test]
async fn navigation_is_pulled_back_to_the_tracker() {
    let app = TestApp::spawn();
    let (_, cookie) = app.submit("azione").await;
    let cookie = cookie.expect("client cookie issued");

    let redirected = app
        .send(empty_request("GET", "/feed", None, Some(&cookie)))
        .await;
    assert_eq!(redirected.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        redirected.headers()[header::LOCATION],
        "/finalizzazione?category=azione"
    );

    // The submission view stays reachable for a new take.
    let exempt = app
        .send(empty_request("GET", "/crea", None, Some(&cookie)))
        .await;
    assert_ne!(exempt.status(), StatusCode::TEMPORARY_REDIRECT);

    // Clients without a pending production browse normally.
    let stranger = app.send(empty_request("GET", "/", None, None)).await;
    assert_eq!(stranger.status(), StatusCode::OK);
}

#[tokio::test]
async fn discarding_clears_the_pending_production() {
    let app = TestApp::spawn();
    let (_, cookie) = app.submit("azione").await;
    let cookie = cookie.expect("client cookie issued");

    let discarded = app
        .send(empty_request("DELETE", "/api/productions/current", None, Some(&cookie)))
        .await;
    assert_eq!(discarded.status(), StatusCode::NO_CONTENT);

    let current = app
        .send(empty_request("GET", "/api/productions/current", None, Some(&cookie)))
        .await;
    assert_eq!(current.status(), StatusCode::GONE);
    assert_eq!(body_json(current).await["error"], "stale_session");

    let page = app.send(empty_request("GET", "/", None, Some(&cookie))).await;
    assert_eq!(page.status(), StatusCode::OK);
}

#[tokio::test]
async fn saving_publishes_and_clears_the_slot() {
    let app = TestApp::spawn();
    let (_, cookie) = app.submit("azione").await;
    let cookie = cookie.expect("client cookie issued");

    let response = app
        .send(json_request(
            "POST",
            "/api/save-video",
            Some(TOKEN),
            Some(&cookie),
            serde_json::json!({
                "videoUrl": "https://provider.test/out.mp4",
                "status": "pubblico",
                "prompt": "a chase on the rooftops",
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with("https://storage.test/video_pubblici/"));

    let published = app.db.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].category, "azione");
    assert_eq!(app.storage.object_count(), 1);

    let current = app
        .send(empty_request("GET", "/api/productions/current", None, Some(&cookie)))
        .await;
    assert_eq!(current.status(), StatusCode::GONE);
}

#[tokio::test]
async fn saving_releases_the_cached_tracker() {
    let app = TestApp::spawn();
    let (_, cookie) = app.submit("azione").await;
    let cookie = cookie.expect("client cookie issued");
    let key = cookie_key(&cookie);
    let _watching = app.state.tracker.attach(key, "job-1", None);
    assert_eq!(app.state.tracker.tracked_job(key).as_deref(), Some("job-1"));

    let response = app
        .send(json_request(
            "POST",
            "/api/save-video",
            Some(TOKEN),
            Some(&cookie),
            serde_json::json!({ "videoUrl": "https://provider.test/out.mp4", "status": "privato" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.state.tracker.tracked_job(key), None);
}

#[tokio::test]
async fn saving_requires_a_valid_credential() {
    let app = TestApp::spawn();
    let response = app
        .send(json_request(
            "POST",
            "/api/save-video",
            Some("forged"),
            None,
            serde_json::json!({ "videoUrl": "https://provider.test/out.mp4", "status": "privato" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.provider.fetched().is_empty());
}

#[tokio::test]
async fn classification_without_a_model_uses_the_fallback() {
    let app = TestApp::spawn();
    let response = app
        .send(json_request(
            "POST",
            "/api/classify-text",
            None,
            None,
            serde_json::json!({ "text": "something unusual", "isCoupleMode": false }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["category"],
        Category::FALLBACK.as_str()
    );
}
