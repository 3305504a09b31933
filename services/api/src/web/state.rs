//! services/api/src/web/state.rs
//!
//! Defines the application's shared state, created once at startup and
//! passed to all handlers.

use std::sync::Arc;

use production_core::ports::{
    DatabaseService, DiagnosticsSink, FaceSwapProvider, ObjectStorage, SessionStore,
    TextClassifier,
};
use production_core::tracker::{TrackerConfig, TrackerRegistry};
use production_core::{
    MagnetGuard, ProductionService, PublicationService, QuotaPolicy, SessionPersistence,
};

use crate::config::Config;

//=========================================================================================
// Construction Inputs
//=========================================================================================

/// The adapters behind every port.
pub struct Ports {
    pub db: Arc<dyn DatabaseService>,
    pub provider: Arc<dyn FaceSwapProvider>,
    pub storage: Arc<dyn ObjectStorage>,
    pub sessions: Arc<dyn SessionStore>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    /// `None` disables the model; prompts then get the fallback category.
    pub classifier: Option<Arc<dyn TextClassifier>>,
}

/// The tunables the services need, separated from `Config` so tests can
/// build a state without environment variables.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub policy: QuotaPolicy,
    pub prompt_max_chars: usize,
    pub storage_base_url: String,
    pub tracker: TrackerConfig,
    pub session_horizon: chrono::Duration,
    pub magnet_horizon: chrono::Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.quota_policy(),
            prompt_max_chars: config.prompt_max_chars,
            storage_base_url: config.backend_url.clone(),
            tracker: TrackerConfig {
                poll_interval: config.poll_interval,
                settle_delay: config.settle_delay,
            },
            session_horizon: config.session_horizon,
            magnet_horizon: config.magnet_horizon,
        }
    }
}

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub diagnostics: Arc<dyn DiagnosticsSink>,
    pub classifier: Option<Arc<dyn TextClassifier>>,
    pub production: Arc<ProductionService>,
    pub publication: Arc<PublicationService>,
    pub sessions: SessionPersistence,
    pub tracker: TrackerRegistry,
    pub guard: MagnetGuard,
}

impl AppState {
    pub fn new(ports: Ports, settings: ServiceSettings) -> Self {
        let sessions = SessionPersistence::new(ports.sessions, settings.session_horizon);
        let production = ProductionService::new(
            ports.db.clone(),
            ports.provider.clone(),
            ports.diagnostics.clone(),
            settings.policy,
            settings.prompt_max_chars,
            settings.storage_base_url,
        );
        let publication = PublicationService::new(
            ports.db.clone(),
            ports.provider.clone(),
            ports.storage,
            sessions.clone(),
            ports.diagnostics.clone(),
        );
        let tracker = TrackerRegistry::new(
            ports.provider,
            sessions.clone(),
            ports.diagnostics.clone(),
            settings.tracker,
        );

        Self {
            db: ports.db,
            diagnostics: ports.diagnostics,
            classifier: ports.classifier,
            production: Arc::new(production),
            publication: Arc::new(publication),
            sessions,
            tracker,
            guard: MagnetGuard::with_defaults(settings.magnet_horizon),
        }
    }
}
