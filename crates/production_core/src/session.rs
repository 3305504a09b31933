//! crates/production_core/src/session.rs
//!
//! Single-slot persistence of the in-flight production, so a reload or a
//! redirect resumes tracking instead of submitting a new job.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::diagnostics::{self, context};
use crate::error::ProductionError;
use crate::ports::{DiagnosticsSink, PortResult, SessionStore};

/// The in-flight production of one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub job_id: String,
    pub target_clip_url: String,
    pub prompt: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    /// Set once the tracker observed success.
    #[serde(default)]
    pub final_artifact_url: Option<String>,
}

impl PendingSession {
    pub fn is_fresh(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        now - self.created_at < horizon
    }
}

/// Raw content of a client's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSlot {
    Empty,
    Pending(PendingSession),
}

/// A slot as seen at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Stale,
    Fresh(PendingSession),
}

impl SessionSlot {
    /// Decodes a stored slot. Malformed contents count as empty.
    pub fn decode(raw: Option<&str>) -> Self {
        match raw.map(serde_json::from_str::<PendingSession>) {
            Some(Ok(session)) => Self::Pending(session),
            Some(Err(e)) => {
                warn!("Discarding malformed pending session: {}", e);
                Self::Empty
            }
            None => Self::Empty,
        }
    }

    pub fn at(self, now: DateTime<Utc>, horizon: Duration) -> SlotState {
        match self {
            Self::Empty => SlotState::Empty,
            Self::Pending(s) if s.is_fresh(now, horizon) => SlotState::Fresh(s),
            Self::Pending(_) => SlotState::Stale,
        }
    }
}

/// Reads and writes the pending session slot with a freshness horizon.
#[derive(Clone)]
pub struct SessionPersistence {
    store: Arc<dyn SessionStore>,
    horizon: Duration,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn SessionStore>, horizon: Duration) -> Self {
        Self { store, horizon }
    }

    /// Overwrites the slot.
    pub async fn save(&self, client_key: &str, session: &PendingSession) -> PortResult<()> {
        let json = serde_json::to_string(session)
            .map_err(|e| crate::ports::PortError::Unexpected(e.to_string()))?;
        self.store.write(client_key, &json).await
    }

    pub async fn slot(&self, client_key: &str) -> PortResult<SessionSlot> {
        let raw = self.store.read(client_key).await?;
        Ok(SessionSlot::decode(raw.as_deref()))
    }

    pub async fn inspect(&self, client_key: &str, now: DateTime<Utc>) -> PortResult<SlotState> {
        Ok(self.slot(client_key).await?.at(now, self.horizon))
    }

    /// The session when present and fresh; `None` when absent, malformed or stale.
    pub async fn load(
        &self,
        client_key: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Option<PendingSession>> {
        Ok(match self.inspect(client_key, now).await? {
            SlotState::Fresh(session) => Some(session),
            SlotState::Empty | SlotState::Stale => None,
        })
    }

    /// Like [`load`](Self::load) but turns absence into `StaleSession`, the
    /// error the tracker reports instead of resuming. Store failures are
    /// written to `sink` and surface as the generic backend error.
    pub async fn load_fresh(
        &self,
        client_key: &str,
        now: DateTime<Utc>,
        sink: &dyn DiagnosticsSink,
    ) -> Result<PendingSession, ProductionError> {
        match self.load(client_key, now).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(ProductionError::StaleSession),
            Err(e) => Err(diagnostics::backend_failure(sink, context::SESSION, e).await),
        }
    }

    /// Stores the final artifact location on the session tracking `job_id`.
    /// A slot that moved on to another job is left alone.
    pub async fn record_artifact(
        &self,
        client_key: &str,
        job_id: &str,
        artifact_url: &str,
    ) -> PortResult<()> {
        if let SessionSlot::Pending(mut session) = self.slot(client_key).await? {
            if session.job_id == job_id {
                session.final_artifact_url = Some(artifact_url.to_string());
                self.save(client_key, &session).await?;
            }
        }
        Ok(())
    }

    pub async fn clear(&self, client_key: &str) -> PortResult<()> {
        self.store.remove(client_key).await
    }
}
