//! services/api/src/adapters/storage.rs
//!
//! Object storage adapter for the backend's storage REST API.

use async_trait::async_trait;
use bytes::Bytes;
use production_core::ports::{ObjectStorage, PortError, PortResult};
use tracing::debug;

pub struct BackendStorageAdapter {
    client: reqwest::Client,
    backend_url: String,
    service_key: String,
}

impl BackendStorageAdapter {
    pub fn new(client: reqwest::Client, backend_url: String, service_key: String) -> Self {
        Self {
            client,
            backend_url,
            service_key,
        }
    }
}

#[async_trait]
impl ObjectStorage for BackendStorageAdapter {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> PortResult<()> {
        let size = data.len();
        let response = self
            .client
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.backend_url, bucket, path
            ))
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Storage request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PortError::Unexpected(format!(
                "Storage upload to {} failed ({}): {}",
                bucket,
                status.as_u16(),
                body
            )));
        }
        debug!(%bucket, %path, size, "Object uploaded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.backend_url, bucket, path
        )
    }
}
