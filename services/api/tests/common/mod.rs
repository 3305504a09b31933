//! Shared harness: the real router over in-memory ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_lib::web::{
    self,
    state::{AppState, Ports, ServiceSettings},
};
use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use production_core::fakes::{
    FakeDatabase, MemorySessionStore, MemoryStorage, RecordingDiagnostics, ScriptedProvider,
};
use production_core::tracker::TrackerConfig;
use production_core::{QuotaPolicy, QuotaState};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

pub const TOKEN: &str = "user-token";
pub const ADMIN_TOKEN: &str = "admin-token";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub db: Arc<FakeDatabase>,
    pub provider: Arc<ScriptedProvider>,
    pub storage: Arc<MemoryStorage>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub user_id: Uuid,
    pub admin_id: Uuid,
    _static_dir: TempDir,
}

impl TestApp {
    /// One user with a face on file and no usage, one admin, no window.
    pub fn spawn() -> Self {
        Self::with_provider(ScriptedProvider::default())
    }

    /// Same as [`spawn`](Self::spawn) with a scripted provider.
    pub fn with_provider(provider: ScriptedProvider) -> Self {
        let db = Arc::new(FakeDatabase::default());
        let provider = Arc::new(provider);
        let storage = Arc::new(MemoryStorage::default());
        let diagnostics = Arc::new(RecordingDiagnostics::default());

        let user_id = Uuid::new_v4();
        db.insert_profile(user_id, Some("user/face.jpg"), QuotaState::default());
        db.insert_token(TOKEN, user_id);

        let admin_id = Uuid::new_v4();
        db.insert_profile(admin_id, None, QuotaState::default());
        db.insert_token(ADMIN_TOKEN, admin_id);
        db.make_admin(admin_id);

        let ports = Ports {
            db: db.clone(),
            provider: provider.clone(),
            storage: storage.clone(),
            sessions: Arc::new(MemorySessionStore::default()),
            diagnostics: diagnostics.clone(),
            classifier: None,
        };
        let settings = ServiceSettings {
            policy: QuotaPolicy::new(2, None, chrono_tz::Europe::Rome),
            prompt_max_chars: 500,
            storage_base_url: "https://backend.test".to_string(),
            tracker: TrackerConfig {
                poll_interval: Duration::from_millis(10),
                settle_delay: Duration::from_millis(5),
            },
            session_horizon: chrono::Duration::hours(2),
            magnet_horizon: chrono::Duration::hours(1),
        };
        let state = Arc::new(AppState::new(ports, settings));

        let static_dir = tempfile::tempdir().expect("static dir");
        std::fs::write(static_dir.path().join("index.html"), "home").expect("index.html");
        let router = web::router(state.clone(), static_dir.path());

        Self {
            router,
            state,
            db,
            provider,
            storage,
            diagnostics,
            user_id,
            admin_id,
            _static_dir: static_dir,
        }
    }

    /// Marks the user as having used `count` attempts today.
    pub fn set_used_today(&self, count: u32) {
        let today = self.state.production.policy().today(Utc::now());
        self.db.set_quota(
            self.user_id,
            QuotaState {
                daily_count: count,
                last_count_date: Some(today),
                last_bonus_date: None,
            },
        );
    }

    /// Serves the router on a loopback port and returns its address.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("server");
        });
        addr
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("router is infallible")
    }

    /// Submits a production as the test user and returns the client cookie.
    pub async fn submit(&self, category: &str) -> (Response<Body>, Option<String>) {
        let request = json_request(
            "POST",
            "/api/face-swap",
            Some(TOKEN),
            None,
            serde_json::json!({
                "videoUrl": "https://clips.test/hero.mp4",
                "prompt": "a chase on the rooftops",
                "category": category,
            }),
        );
        let response = self.send(request).await;
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        (response, cookie)
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    cookie: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn empty_request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    cookie: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).expect("request")
}

/// The client key carried by a `deep_client=...` cookie pair.
pub fn cookie_key(cookie: &str) -> &str {
    cookie.split_once('=').map(|(_, key)| key).unwrap_or(cookie)
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
