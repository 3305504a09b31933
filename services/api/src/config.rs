//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use production_core::{HourWindow, QuotaPolicy};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Model version of the face-swap model used in production.
pub const DEFAULT_PROVIDER_MODEL_VERSION: &str =
    "104b4a39315349db50880757bc8c1c996c5309e3aa11286b0a3c84dab81fd440";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub backend_url: String,
    pub backend_service_key: String,
    pub provider_api_token: String,
    pub provider_base_url: String,
    pub provider_model_version: String,
    pub openai_api_key: Option<String>,
    pub classifier_model: String,
    pub daily_limit: u32,
    pub window: Option<HourWindow>,
    pub timezone: Tz,
    pub prompt_max_chars: usize,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub session_horizon: chrono::Duration,
    pub magnet_horizon: chrono::Duration,
    pub session_dir: PathBuf,
    pub static_dir: PathBuf,
    pub cors_origin: String,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address = parsed::<SocketAddr>(
            "BIND_ADDRESS",
            SocketAddr::from(([0, 0, 0, 0], 3000)),
        )?;
        let database_url = required("DATABASE_URL")?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load Backend and Provider Credentials (required) ---
        let backend_url = required("BACKEND_URL")?.trim_end_matches('/').to_string();
        let backend_service_key = required("BACKEND_SERVICE_KEY")?;
        let provider_api_token = required("PROVIDER_API_TOKEN")?;
        let provider_base_url = or_default("PROVIDER_BASE_URL", "https://api.replicate.com/v1")
            .trim_end_matches('/')
            .to_string();
        let provider_model_version =
            or_default("PROVIDER_MODEL_VERSION", DEFAULT_PROVIDER_MODEL_VERSION);

        // --- Classifier (optional, falls back to a fixed category) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let classifier_model = or_default("CLASSIFIER_MODEL", "gpt-4o-mini");

        // --- Quota & Window Policy ---
        let daily_limit = parsed::<u32>("DAILY_LIMIT", 2)?;
        let start_hour = parsed::<u32>("WINDOW_START_HOUR", 8)?;
        let end_hour = parsed::<u32>("WINDOW_END_HOUR", 23)?;
        for (name, hour) in [("WINDOW_START_HOUR", start_hour), ("WINDOW_END_HOUR", end_hour)] {
            if hour > 24 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    format!("{} is not an hour of the day", hour),
                ));
            }
        }
        let window_disabled = parsed::<bool>("WINDOW_DISABLED", false)?;
        let window = (!window_disabled).then(|| HourWindow::new(start_hour, end_hour));

        let timezone_str = or_default("POLICY_TIMEZONE", "Europe/Rome");
        let timezone = timezone_str
            .parse::<Tz>()
            .map_err(|e| ConfigError::InvalidValue("POLICY_TIMEZONE".to_string(), e.to_string()))?;

        let prompt_max_chars = parsed::<usize>("PROMPT_MAX_CHARS", 500)?;

        // --- Tracker & Session ---
        let poll_interval = Duration::from_millis(parsed::<u64>("POLL_INTERVAL_MS", 3000)?);
        let settle_delay = Duration::from_millis(parsed::<u64>("SETTLE_DELAY_MS", 1500)?);
        let session_horizon =
            chrono::Duration::minutes(parsed::<i64>("SESSION_HORIZON_MINUTES", 120)?);
        let magnet_horizon =
            chrono::Duration::minutes(parsed::<i64>("MAGNET_HORIZON_MINUTES", 60)?);
        let session_dir = PathBuf::from(or_default("SESSION_DIR", "./data/sessions"));
        let static_dir = PathBuf::from(or_default("STATIC_DIR", "./public"));
        let cors_origin = or_default("CORS_ORIGIN", "http://localhost:3000");

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            backend_url,
            backend_service_key,
            provider_api_token,
            provider_base_url,
            provider_model_version,
            openai_api_key,
            classifier_model,
            daily_limit,
            window,
            timezone,
            prompt_max_chars,
            poll_interval,
            settle_delay,
            session_horizon,
            magnet_horizon,
            session_dir,
            static_dir,
            cors_origin,
        })
    }

    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy::new(self.daily_limit, self.window, self.timezone)
    }
}
