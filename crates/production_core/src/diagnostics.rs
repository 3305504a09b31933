//! crates/production_core/src/diagnostics.rs
//!
//! Error log entries, funnel events and the derived operational views used
//! by the admin dashboard. None of this feeds back into tracker behaviour.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ProductionError;
use crate::ports::DiagnosticsSink;
use crate::submission::GENERIC_BACKEND_MESSAGE;

/// Context tags written with every diagnostic entry.
pub mod context {
    pub const SUBMISSION: &str = "API_POST_FaceSwap_Crash";
    pub const QUOTA_UPDATE: &str = "API_POST_QuotaUpdate_Crash";
    pub const QUOTA_RACE: &str = "API_POST_QuotaRace";
    pub const POLLING: &str = "API_GET_Polling_Crash";
    pub const TRACKER: &str = "Tracker_Polling_Crash";
    pub const PUBLICATION: &str = "API_POST_SaveVideo_Crash";
    pub const STORAGE: &str = "Storage_Upload_Crash";
    pub const QUOTA_STATUS: &str = "API_GET_Quota_Crash";
    pub const SESSION: &str = "Session_Store_Crash";
    pub const KILL_SWITCH: &str = "KILL_SWITCH_STATUS";
}

/// Generations without a terminal event after this long are "abandoned".
pub const ABANDON_AFTER_SECS: i64 = 180;

/// Errors older than this do not affect the status lights.
pub const STATUS_LOOKBACK_MINS: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub device_info: String,
    pub error_message: String,
    pub context: String,
}

impl DiagnosticEntry {
    pub fn server(context: &str, error_message: impl Into<String>) -> Self {
        Self {
            device_info: "API_Server".to_string(),
            error_message: error_message.into(),
            context: context.to_string(),
        }
    }
}

/// A stored diagnostic entry.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub id: i64,
    pub device_info: String,
    pub error_message: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStep {
    VideoStart,
    VideoReady,
    VideoFailed,
}

impl FunnelStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VideoStart => "video_start",
            Self::VideoReady => "video_ready",
            Self::VideoFailed => "video_failed",
        }
    }

    pub fn from_str_value(value: &str) -> Option<Self> {
        match value {
            "video_start" => Some(Self::VideoStart),
            "video_ready" => Some(Self::VideoReady),
            "video_failed" => Some(Self::VideoFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunnelEvent {
    pub session_id: String,
    pub step: FunnelStep,
    pub created_at: DateTime<Utc>,
}

/// Writes an error entry, logging instead of failing when the sink is down.
pub async fn report(sink: &dyn DiagnosticsSink, entry: DiagnosticEntry) {
    if let Err(e) = sink.record_error(&entry).await {
        warn!(context = %entry.context, "Failed to write diagnostic entry: {:?}", e);
    }
}

/// Logs and records an unexpected failure. The returned error carries only
/// the generic message; the cause stays in the log and the diagnostics table.
pub async fn backend_failure(
    sink: &dyn DiagnosticsSink,
    context: &str,
    cause: impl std::fmt::Debug,
) -> ProductionError {
    error!(context, "Backend failure: {:?}", cause);
    report(sink, DiagnosticEntry::server(context, format!("{:?}", cause))).await;
    ProductionError::Backend(GENERIC_BACKEND_MESSAGE.to_string())
}

/// Records a funnel step, logging instead of failing when the sink is down.
pub async fn track(
    sink: &dyn DiagnosticsSink,
    step: FunnelStep,
    client_key: &str,
    user_id: Option<Uuid>,
) {
    if let Err(e) = sink.record_funnel(step, client_key, user_id).await {
        warn!(step = step.as_str(), "Failed to record funnel event: {:?}", e);
    }
}

/// Counts sessions that started a generation, never reached a terminal
/// event, and started more than three minutes before `now`.
pub fn count_abandoned(events: &[FunnelEvent], now: DateTime<Utc>) -> usize {
    let mut sessions: HashMap<&str, (Option<DateTime<Utc>>, bool)> = HashMap::new();
    for event in events {
        let entry = sessions.entry(event.session_id.as_str()).or_default();
        match event.step {
            FunnelStep::VideoStart => entry.0 = Some(event.created_at),
            FunnelStep::VideoReady | FunnelStep::VideoFailed => entry.1 = true,
        }
    }

    let threshold = Duration::seconds(ABANDON_AFTER_SECS);
    sessions
        .values()
        .filter(|(start, ended)| !ended && start.is_some_and(|s| now - s > threshold))
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Light {
    Online,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub database: Light,
    pub provider: Light,
    pub storage: Light,
}

/// Derives the status lights from recent diagnostics.
///
/// `database_reachable` is false when the diagnostics themselves could not
/// be read.
pub fn system_status(
    records: &[DiagnosticRecord],
    database_reachable: bool,
    now: DateTime<Utc>,
) -> SystemStatus {
    let since = now - Duration::minutes(STATUS_LOOKBACK_MINS);
    let recent = || records.iter().filter(move |r| r.created_at > since);

    let provider_down = recent().any(|r| {
        r.context.contains("API") || r.error_message.to_lowercase().contains("provider")
    });
    let storage_down = recent().any(|r| r.context.to_lowercase().contains("storage"));

    let light = |down: bool| if down { Light::Error } else { Light::Online };
    SystemStatus {
        database: light(!database_reachable),
        provider: light(provider_down),
        storage: light(storage_down),
    }
}
