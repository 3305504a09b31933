//! crates/production_core/src/error.rs
//!
//! The tagged error taxonomy surfaced to callers of the production flows.

use serde::Serialize;

/// Errors produced by submission, tracking and publication.
///
/// Every variant is produced at the source of the failure, so callers pick a
/// recovery prompt by matching on the variant instead of on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Production is temporarily suspended")]
    ServiceUnavailable,
    #[error("Daily limit of {limit} videos reached")]
    QuotaExceeded { limit: u32 },
    #[error("Production is only active from {start_hour}:00 to {end_hour}:00")]
    OutOfWindow { start_hour: u32, end_hour: u32 },
    #[error("No face photo on file")]
    MissingFaceAsset,
    /// Message is safe to show; the underlying cause is only logged.
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("The pending production has expired")]
    StaleSession,
}

/// What the user is prompted to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    UploadPhoto,
    LogIn,
    WaitForWindow,
    ComeBackTomorrow,
    WaitForMaintenance,
    ReturnToCreation,
}

impl ProductionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::ServiceUnavailable => "service_unavailable",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::OutOfWindow { .. } => "out_of_window",
            Self::MissingFaceAsset => "missing_face_asset",
            Self::Backend(_) => "backend_error",
            Self::Transport(_) => "transport_error",
            Self::StaleSession => "stale_session",
        }
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self {
            Self::MissingFaceAsset => RecoveryAction::UploadPhoto,
            Self::Unauthorized => RecoveryAction::LogIn,
            Self::OutOfWindow { .. } => RecoveryAction::WaitForWindow,
            Self::QuotaExceeded { .. } => RecoveryAction::ComeBackTomorrow,
            Self::ServiceUnavailable => RecoveryAction::WaitForMaintenance,
            Self::InvalidInput(_)
            | Self::Backend(_)
            | Self::Transport(_)
            | Self::StaleSession => RecoveryAction::ReturnToCreation,
        }
    }
}
