//! Artifact publishing: delete, upload, and hand out a cache-busted public URL.
//!
//! Object stores and CDNs in front of them may keep serving stale bytes for a
//! path. Each publish therefore removes the old object first, uploads with
//! overwrite enabled, and appends `?t=<millis>` to the public URL so
//! consumers always fetch the newest bytes.

use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{error, info, warn};

use crate::config::ImageFormat;
use crate::contract::{ObjectStore, PublishedArtifact};
use crate::error::ExportError;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Current time in epoch milliseconds, strictly increasing within the
/// process: two calls never return the same value.
pub fn fresh_timestamp_millis() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let previous = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

/// `<node id with ':' as '_'>_<millis>.<ext>`, e.g. `1_2_1718000000000.png`.
pub fn artifact_file_name(node_id: &str, stamp_millis: i64, format: ImageFormat) -> String {
    format!(
        "{}_{}.{}",
        node_id.replace(':', "_"),
        stamp_millis,
        format.as_str()
    )
}

/// Content type inferred from the file extension, falling back to a generic
/// binary type.
pub fn content_type_for(file_name: &str) -> &'static str {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
}

/// Publishes files under a fixed key prefix of an [`ObjectStore`].
pub struct ArtifactPublisher<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    prefix: String,
}

impl<'a, S: ObjectStore + ?Sized> ArtifactPublisher<'a, S> {
    pub fn new(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn object_key(&self, file_name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        }
    }

    /// Uploads `bytes` as `file_name` and returns the artifact with its
    /// cache-busted public URL.
    ///
    /// The delete before the upload is advisory: its failure is logged and
    /// ignored because the upload overwrites anyway. An upload failure is
    /// returned as [`ExportError::Storage`].
    pub async fn publish(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<PublishedArtifact, ExportError> {
        let key = self.object_key(file_name);

        if let Err(e) = self.store.remove(&key).await {
            warn!(key = %key, error = %e, "[PUBLISH] Pre-upload delete failed, uploading anyway");
        }

        let content_type = content_type_for(file_name);
        let size = bytes.len();
        self.store
            .upload(&key, bytes, content_type)
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "[PUBLISH] Upload failed");
                match e {
                    ExportError::Storage { .. } => e,
                    other => ExportError::storage(&key, other.to_string()),
                }
            })?;

        let base = self.store.public_url(&key);
        let separator = if base.contains('?') { '&' } else { '?' };
        let public_url = format!("{base}{separator}t={}", fresh_timestamp_millis());

        info!(key = %key, size, content_type, url = %public_url, "[PUBLISH] Uploaded artifact");
        Ok(PublishedArtifact {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            public_url,
        })
    }
}
