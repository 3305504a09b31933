//! crates/production_core/src/domain.rs
//!
//! Core data structures shared by the submission, tracking and publication
//! flows. These structs are independent of any database or wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecoveryAction;
use crate::policy::QuotaState;

/// A user profile as owned by the backend. Only the fields this core reads.
#[derive(Debug, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub username: Option<String>,
    /// Path or URL of the uploaded face image. `None` until the user uploads one.
    pub face_url: Option<String>,
    pub quota: QuotaState,
    pub is_admin: bool,
}

/// Provider-side job status. Mapped, never redefined, by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// One answer from the provider's status endpoint.
#[derive(Debug, Clone)]
pub struct JobPoll {
    pub status: JobStatus,
    pub output_url: Option<String>,
    /// Set by the provider adapter when `status` is `Failed` or `Canceled`.
    pub failure: Option<JobFailure>,
}

/// Why a tracked job ended without an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFailureKind {
    /// The provider could not use the uploaded face image.
    FaceRejected,
    /// Any other provider-side failure.
    Generation,
    /// The status request itself failed.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub kind: JobFailureKind,
    pub message: String,
}

impl JobFailure {
    pub const GENERIC_MESSAGE: &'static str = "The video could not be produced.";

    pub fn generation(message: Option<String>) -> Self {
        Self {
            kind: JobFailureKind::Generation,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| Self::GENERIC_MESSAGE.to_string()),
        }
    }

    pub fn recovery(&self) -> RecoveryAction {
        match self.kind {
            JobFailureKind::FaceRejected => RecoveryAction::UploadPhoto,
            JobFailureKind::Generation | JobFailureKind::Transport => {
                RecoveryAction::ReturnToCreation
            }
        }
    }
}

/// Returned to the caller after a submission was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: String,
    /// Usage counter after this submission.
    pub daily_count: u32,
}

/// Where a finished video is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[serde(alias = "pubblico")]
    Public,
    #[serde(alias = "privato")]
    Private,
}

impl Visibility {
    /// Object storage bucket for this visibility.
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Public => "video_pubblici",
            Self::Private => "video_privati",
        }
    }
}

/// Metadata row to insert after the artifact copy has been uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPublishedVideo {
    pub user_id: Uuid,
    pub video_url: String,
    pub caption: String,
    pub category: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone)]
pub struct PublishedVideo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub video_url: String,
    pub caption: String,
    pub category: String,
    pub visibility: Visibility,
    pub oscar_count: i32,
    pub created_at: DateTime<Utc>,
}
