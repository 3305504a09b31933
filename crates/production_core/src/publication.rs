//! crates/production_core/src/publication.rs
//!
//! Copies a finished artifact into durable storage and records it, then
//! releases the client's pending session.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::diagnostics::{self, context};
use crate::domain::{NewPublishedVideo, PublishedVideo, Visibility};
use crate::error::ProductionError;
use crate::ports::{DatabaseService, DiagnosticsSink, FaceSwapProvider, ObjectStorage};
use crate::session::SessionPersistence;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Artifact and category default to what the pending session recorded.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub artifact_url: Option<String>,
    pub visibility: Visibility,
    pub caption: String,
    pub category: Option<String>,
}

pub struct PublicationService {
    db: Arc<dyn DatabaseService>,
    provider: Arc<dyn FaceSwapProvider>,
    storage: Arc<dyn ObjectStorage>,
    sessions: SessionPersistence,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl PublicationService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        provider: Arc<dyn FaceSwapProvider>,
        storage: Arc<dyn ObjectStorage>,
        sessions: SessionPersistence,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Self {
        Self {
            db,
            provider,
            storage,
            sessions,
            diagnostics,
        }
    }

    async fn fail(&self, context: &str, cause: impl std::fmt::Debug) -> ProductionError {
        diagnostics::backend_failure(self.diagnostics.as_ref(), context, cause).await
    }

    /// Fetch, upload, resolve the public URL, insert the record, clear the
    /// slot. Any failing step aborts the rest and leaves the slot untouched.
    pub async fn publish(
        &self,
        user_id: Uuid,
        client_key: &str,
        request: PublishRequest,
        now: DateTime<Utc>,
    ) -> Result<PublishedVideo, ProductionError> {
        let pending = match self.sessions.load(client_key, now).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(%client_key, "Pending session unreadable during publication: {:?}", e);
                None
            }
        };

        let artifact_url = request
            .artifact_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| pending.as_ref().and_then(|p| p.final_artifact_url.clone()))
            .ok_or_else(|| ProductionError::InvalidInput("No finished video to save".to_string()))?;
        let category = request
            .category
            .filter(|c| !c.trim().is_empty())
            .or_else(|| pending.as_ref().map(|p| p.category.clone()))
            .unwrap_or_default();

        let data: Bytes = match self.provider.fetch_artifact(&artifact_url).await {
            Ok(data) => data,
            Err(e) => return Err(self.fail(context::PUBLICATION, e).await),
        };

        let bucket = request.visibility.bucket();
        let path = format!("{}/{}.mp4", user_id, now.timestamp_millis());
        if let Err(e) = self
            .storage
            .upload(bucket, &path, data, VIDEO_CONTENT_TYPE)
            .await
        {
            return Err(self.fail(context::STORAGE, e).await);
        }
        let video_url = self.storage.public_url(bucket, &path);

        let record = NewPublishedVideo {
            user_id,
            video_url,
            caption: request.caption,
            category,
            visibility: request.visibility,
        };
        let published = match self.db.insert_published_video(&record).await {
            Ok(published) => published,
            Err(e) => return Err(self.fail(context::PUBLICATION, e).await),
        };
        info!(%user_id, video_id = %published.id, visibility = ?published.visibility, "Video published");

        if let Err(e) = self.sessions.clear(client_key).await {
            warn!(%client_key, "Published but could not clear pending session: {:?}", e);
        }
        Ok(published)
    }
}
