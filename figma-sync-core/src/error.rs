//! Error taxonomy for a single export run.
//!
//! Every stage of the pipeline fails with one [`ExportError`] variant and the
//! error travels to the caller unmodified: nothing in the pipeline retries or
//! recovers locally.

use std::path::PathBuf;

use thiserror::Error;

use crate::contract::PublishedArtifact;
use crate::export::ExportStage;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to load session cookies from {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },

    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("browser close failed: {0}")]
    BrowserClose(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page script evaluation failed: {0}")]
    Script(String),

    #[error("control '{text}' not found after {waited_ms}ms")]
    ControlNotFound { text: String, waited_ms: u64 },

    #[error("sync did not finish within {waited_ms}ms ('{busy_text}' still visible)")]
    SyncTimeout { busy_text: String, waited_ms: u64 },

    #[error("remote API error{}: {message}", status_suffix(.status))]
    RemoteApi { status: Option<u16>, message: String },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("failed to write export file {path}: {source}")]
    ExportDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage error for '{key}': {message}")]
    Storage { key: String, message: String },
}

impl ExportError {
    pub fn remote_api(status: Option<u16>, message: impl Into<String>) -> Self {
        ExportError::RemoteApi {
            status,
            message: message.into(),
        }
    }

    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        ExportError::Storage {
            key: key.into(),
            message: message.into(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

/// A failed run: the stage it died in, the unmodified stage error, and any
/// artifacts that were already published before the failure. Published
/// artifacts are never rolled back.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub stage: ExportStage,
    #[source]
    pub error: ExportError,
    pub published: Vec<PublishedArtifact>,
}

impl RunFailure {
    pub fn published_urls(&self) -> Vec<String> {
        self.published.iter().map(|a| a.public_url.clone()).collect()
    }
}
