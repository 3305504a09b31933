//! services/api/src/adapters/face_swap.rs
//!
//! REST client for the face-swap provider's prediction API. Implements the
//! `FaceSwapProvider` port with [`reqwest`].

use async_trait::async_trait;
use bytes::Bytes;
use production_core::domain::{JobFailure, JobFailureKind, JobPoll, JobStatus};
use production_core::ports::{FaceSwapProvider, PortError, PortResult};
use serde::Deserialize;
use tracing::debug;

/// Substrings of provider error text that mean the face image was unusable.
const FACE_ERROR_MARKERS: &[&str] = &["face", "volto", "photo", "foto", "image"];

/// Errors from the provider REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },
}

impl From<ProviderApiError> for PortError {
    fn from(e: ProviderApiError) -> Self {
        match e {
            ProviderApiError::Api { status: 401, .. } => PortError::Unauthorized,
            ProviderApiError::Api { status: 404, body } => PortError::NotFound(body),
            other => PortError::Unexpected(other.to_string()),
        }
    }
}

/// A prediction as returned by `POST /predictions` and `GET /predictions/{id}`.
#[derive(Debug, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl Prediction {
    fn output_url(&self) -> Option<String> {
        match self.output.as_ref()? {
            serde_json::Value::String(url) => Some(url.clone()),
            serde_json::Value::Array(items) => items
                .iter()
                .rev()
                .find_map(|v| v.as_str().map(str::to_string)),
            _ => None,
        }
    }

    fn error_text(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Maps the provider's status vocabulary onto ours.
    pub fn to_domain(&self) -> JobPoll {
        let status = match self.status.as_str() {
            "starting" | "queued" => JobStatus::Starting,
            "processing" => JobStatus::Processing,
            "succeeded" => JobStatus::Succeeded,
            "canceled" => JobStatus::Canceled,
            _ => JobStatus::Failed,
        };
        let failure = matches!(status, JobStatus::Failed | JobStatus::Canceled)
            .then(|| classify_failure(self.error_text()));
        JobPoll {
            status,
            output_url: self.output_url(),
            failure,
        }
    }
}

/// Tags a provider failure at the source so callers never match on text.
pub fn classify_failure(message: Option<String>) -> JobFailure {
    let face_related = message.as_deref().is_some_and(|m| {
        let lower = m.to_lowercase();
        FACE_ERROR_MARKERS.iter().any(|k| lower.contains(k))
    });
    if face_related {
        JobFailure {
            kind: JobFailureKind::FaceRejected,
            message: message.unwrap_or_default(),
        }
    } else {
        JobFailure::generation(message)
    }
}

pub struct ReplicateAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    model_version: String,
}

impl ReplicateAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_token: String,
        model_version: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_token,
            model_version,
        }
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_prediction(response: reqwest::Response) -> Result<Prediction, ProviderApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<Prediction>().await?)
    }
}

#[async_trait]
impl FaceSwapProvider for ReplicateAdapter {
    async fn submit(&self, source_video_url: &str, target_face_url: &str) -> PortResult<String> {
        let body = serde_json::json!({
            "version": self.model_version,
            "input": {
                "source": source_video_url,
                "target": target_face_url,
            },
        });
        let response = self
            .client
            .post(format!("{}/predictions", self.base_url))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(ProviderApiError::from)?;
        let prediction = Self::parse_prediction(response).await?;
        debug!(job_id = %prediction.id, status = %prediction.status, "Prediction created");
        Ok(prediction.id)
    }

    async fn poll(&self, job_id: &str) -> PortResult<JobPoll> {
        let response = self
            .client
            .get(format!("{}/predictions/{}", self.base_url, job_id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(ProviderApiError::from)?;
        let prediction = Self::parse_prediction(response).await?;
        debug!(%job_id, status = %prediction.status, "Prediction polled");
        Ok(prediction.to_domain())
    }

    async fn fetch_artifact(&self, url: &str) -> PortResult<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ProviderApiError::from)?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await.map_err(ProviderApiError::from)?)
    }
}
