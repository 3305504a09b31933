//! crates/production_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! core independent of the relational backend, the face-swap provider, the
//! object store and the client-local session slot.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::diagnostics::{DiagnosticEntry, DiagnosticRecord, FunnelEvent, FunnelStep};
use crate::domain::{JobPoll, NewPublishedVideo, Profile, PublishedVideo};
use crate::policy::QuotaState;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Identity ---
    /// Resolves a bearer credential to a user id.
    async fn resolve_bearer(&self, token: &str) -> PortResult<Uuid>;

    // --- Profiles & Quota ---
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    /// Atomically records one generation for `today`.
    ///
    /// The counter is reset to 1 when the stored date is not `today`, and
    /// incremented otherwise, but only while the effective count is below
    /// `limit`. Returns the new count, or `None` when the limit was already
    /// reached by the time the update ran.
    async fn try_record_usage(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>>;

    async fn save_quota(&self, user_id: Uuid, quota: &QuotaState) -> PortResult<()>;

    // --- Kill-switch ---
    async fn maintenance_mode(&self) -> PortResult<bool>;

    async fn set_maintenance_mode(&self, enabled: bool) -> PortResult<()>;

    // --- Publication ---
    async fn insert_published_video(&self, video: &NewPublishedVideo)
        -> PortResult<PublishedVideo>;

    // --- Diagnostics reads ---
    async fn recent_diagnostics(&self, limit: i64) -> PortResult<Vec<DiagnosticRecord>>;

    async fn funnel_events_since(&self, since: DateTime<Utc>) -> PortResult<Vec<FunnelEvent>>;
}

#[async_trait]
pub trait FaceSwapProvider: Send + Sync {
    /// Starts a generation job and returns the provider's opaque job id.
    async fn submit(&self, source_video_url: &str, target_face_url: &str) -> PortResult<String>;

    /// Queries the current status of a job.
    async fn poll(&self, job_id: &str) -> PortResult<JobPoll>;

    /// Downloads a finished artifact from the provider's delivery URL.
    async fn fetch_artifact(&self, url: &str) -> PortResult<Bytes>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> PortResult<()>;

    /// The durable public URL of an uploaded object.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Returns the model's raw label for a prompt.
    async fn classify(&self, text: &str) -> PortResult<String>;
}

/// A durable single-slot store, one slot per client key.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn read(&self, client_key: &str) -> PortResult<Option<String>>;

    /// Overwrites whatever the slot held.
    async fn write(&self, client_key: &str, contents: &str) -> PortResult<()>;

    async fn remove(&self, client_key: &str) -> PortResult<()>;
}

#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn record_error(&self, entry: &DiagnosticEntry) -> PortResult<()>;

    async fn record_funnel(
        &self,
        step: FunnelStep,
        client_key: &str,
        user_id: Option<Uuid>,
    ) -> PortResult<()>;
}
