//! Supabase Storage client implementing [`ObjectStore`].

use async_trait::async_trait;
use figma_sync_core::contract::ObjectStore;
use figma_sync_core::ExportError;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;
use tracing::{debug, error, info};

pub struct SupabaseStorage {
    http: reqwest::Client,
    base_url: String,
    key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(
        base_url: impl Into<String>,
        key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let bucket = bucket.into();
        info!(base_url = %base_url, bucket = %bucket, "Initialized SupabaseStorage");
        Self {
            http: reqwest::Client::new(),
            base_url,
            key: key.into(),
            bucket,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.key).header("apikey", &self.key)
    }

    async fn failure(key: &str, response: reqwest::Response) -> ExportError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ExportError::storage(key, format!("HTTP {}: {}", status.as_u16(), body.trim()))
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn remove(&self, key: &str) -> Result<(), ExportError> {
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .authorized(self.http.delete(&url))
            .json(&json!({ "prefixes": [key] }))
            .send()
            .await
            .map_err(|e| ExportError::storage(key, e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::failure(key, response).await);
        }
        debug!(key, "[STORAGE] Removed object");
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key);
        let response = self
            .authorized(self.http.post(&url))
            .header("x-upsert", "true")
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, key, "[STORAGE] Upload request failed");
                ExportError::storage(key, e.to_string())
            })?;
        if !response.status().is_success() {
            return Err(Self::failure(key, response).await);
        }
        debug!(key, content_type, "[STORAGE] Uploaded object");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, key
        )
    }
}
