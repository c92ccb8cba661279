//! Figma REST client implementing [`RenderApi`].
//!
//! - `GET /v1/files/{key}` for the current document version.
//! - `GET /v1/images/{key}` for one batched render of all nodes.
//! - Plain GET (no token) for the transient render URLs.
//!
//! Nothing is retried here; every failure is mapped to the matching
//! [`ExportError`] and returned.

use std::collections::HashMap;

use async_trait::async_trait;
use figma_sync_core::config::ImageFormat;
use figma_sync_core::contract::RenderApi;
use figma_sync_core::publish::fresh_timestamp_millis;
use figma_sync_core::ExportError;
use serde::Deserialize;
use tracing::{debug, error, info};

const TOKEN_HEADER: &str = "X-Figma-Token";

pub struct FigmaClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    images: HashMap<String, Option<String>>,
}

/// Error body the provider returns on non-success responses.
#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl FigmaClient {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        info!(api_base = %api_base, "Initialized FigmaClient");
        Self {
            http: reqwest::Client::new(),
            api_base,
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExportError> {
        let response = self
            .http
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, url, "[FIGMA] Request failed");
                ExportError::remote_api(None, e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExportError::remote_api(Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderError>(&body)
                .ok()
                .and_then(|p| p.err.or(p.message))
                .unwrap_or_else(|| body.clone());
            error!(status = status.as_u16(), message = %message, url, "[FIGMA] Provider returned an error");
            return Err(ExportError::remote_api(Some(status.as_u16()), message));
        }

        serde_json::from_str(&body).map_err(|e| {
            error!(error = %e, url, "[FIGMA] Unexpected response body");
            ExportError::remote_api(Some(status.as_u16()), format!("unexpected response body: {e}"))
        })
    }
}

#[async_trait]
impl RenderApi for FigmaClient {
    async fn file_version(&self, file_key: &str) -> Result<String, ExportError> {
        let url = format!("{}/v1/files/{}", self.api_base, file_key);
        let file: FileResponse = self.get_json(&url, &[("depth", "1".to_string())]).await?;
        debug!(file_key, version = %file.version, "[FIGMA] Fetched file version");
        Ok(file.version)
    }

    async fn image_urls(
        &self,
        file_key: &str,
        node_ids: &[String],
        version: &str,
        format: ImageFormat,
    ) -> Result<HashMap<String, Option<String>>, ExportError> {
        let url = format!("{}/v1/images/{}", self.api_base, file_key);
        let query = [
            ("ids", node_ids.join(",")),
            ("format", format.as_str().to_string()),
            ("version", version.to_string()),
            ("ts", fresh_timestamp_millis().to_string()),
        ];
        let response: ImagesResponse = self.get_json(&url, &query).await?;
        if let Some(err) = response.err.filter(|e| !e.is_empty()) {
            error!(file_key, err = %err, "[FIGMA] Render request reported an error");
            return Err(ExportError::remote_api(None, err));
        }
        debug!(file_key, images = response.images.len(), "[FIGMA] Render URLs received");
        Ok(response.images)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ExportError> {
        let failed = |reason: String| ExportError::Download {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), url, "[FIGMA] Render download failed");
            return Err(failed(format!("HTTP {status}")));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        debug!(url, size = bytes.len(), "[FIGMA] Downloaded render");
        Ok(bytes.to_vec())
    }
}
