//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        BackendStorageAdapter, DbAdapter, FileSessionStore, OpenAiClassifierAdapter,
        ReplicateAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        self,
        rest::ApiDoc,
        state::{AppState, Ports, ServiceSettings},
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{extract::DefaultBodyLimit, Router};
use production_core::ports::TextClassifier;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let http = reqwest::Client::new();
    let provider = Arc::new(ReplicateAdapter::new(
        http.clone(),
        config.provider_base_url.clone(),
        config.provider_api_token.clone(),
        config.provider_model_version.clone(),
    ));
    let storage = Arc::new(BackendStorageAdapter::new(
        http,
        config.backend_url.clone(),
        config.backend_service_key.clone(),
    ));
    let sessions = Arc::new(FileSessionStore::open(&config.session_dir).await?);

    let classifier: Option<Arc<dyn TextClassifier>> = match &config.openai_api_key {
        Some(key) => {
            let openai_client = Client::with_config(OpenAIConfig::new().with_api_key(key));
            Some(Arc::new(OpenAiClassifierAdapter::new(
                openai_client,
                config.classifier_model.clone(),
            )))
        }
        None => {
            warn!("OPENAI_API_KEY not set; prompts will be classified by keyword only");
            None
        }
    };

    // --- 4. Build the Shared AppState ---
    let ports = Ports {
        db: db_adapter.clone(),
        provider,
        storage,
        sessions,
        diagnostics: db_adapter,
        classifier,
    };
    let app_state = Arc::new(AppState::new(ports, ServiceSettings::from_config(&config)));

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(web::router(app_state, &config.static_dir))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
