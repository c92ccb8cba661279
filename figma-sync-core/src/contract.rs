//! # contract: seams between the export pipeline and the outside world
//!
//! The pipeline talks to three external systems: a headless browser, the
//! design provider's REST API, and a public object store. Each one sits behind
//! a trait in this module so the orchestrator can be driven by real clients
//! (see the `figma-sync` binary crate) or by `mockall` mocks in tests.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; enable the `test-export-mocks`
//!   feature (on by default) to use the generated `Mock*` types from another crate.
//!
//! ## Implementing a new backend
//! - Implement the trait, map transport failures to the matching
//!   [`ExportError`] variant, and never retry inside the implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mockall::{automock, predicate::*};

use crate::config::ImageFormat;
use crate::error::ExportError;

/// SameSite attribute of a persisted cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// One record of the persisted session cookie file.
///
/// The file is a JSON array in the shape browser-automation tools export
/// (`name`, `value`, `domain`, `path`, `expires`, `httpOnly`, `secure`,
/// `sameSite`). Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix timestamp in seconds; `-1` or absent means a session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: Option<bool>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub same_site: Option<SameSite>,
}

/// A node's transient render location, as issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSource {
    pub node_id: String,
    pub source_url: String,
}

/// A render that has been uploaded to the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedArtifact {
    pub file_name: String,
    pub content_type: String,
    /// Public URL including the `?t=<millis>` freshness parameter.
    pub public_url: String,
}

/// Launches a browser with a pre-authenticated cookie jar.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a browser, install `cookies`, and return a page ready for navigation.
    async fn launch(
        &self,
        cookies: Vec<SessionCookie>,
    ) -> Result<Box<dyn BrowserSession>, ExportError>;
}

/// A live page inside a launched browser.
///
/// All DOM inspection goes through [`BrowserSession::evaluate_bool`]; the
/// scripts themselves are built in [`crate::session`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the page's load event.
    async fn goto(&self, url: &str) -> Result<(), ExportError>;

    /// Evaluate a script in the page and return its boolean result.
    async fn evaluate_bool(&self, script: &str) -> Result<bool, ExportError>;

    /// Release the page and the browser process behind it.
    async fn close(&self) -> Result<(), ExportError>;
}

/// Transport for the design provider's REST API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RenderApi: Send + Sync {
    /// Current version token of the document.
    async fn file_version(&self, file_key: &str) -> Result<String, ExportError>;

    /// One batched render request for all `node_ids` at `version`.
    ///
    /// Returns the provider's raw mapping; a `None` value means the provider
    /// could not render that node.
    async fn image_urls(
        &self,
        file_key: &str,
        node_ids: &[String],
        version: &str,
        format: ImageFormat,
    ) -> Result<HashMap<String, Option<String>>, ExportError>;

    /// Plain binary GET of a transient render URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ExportError>;
}

/// Transport for the public object store.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Delete the object at `key`. A missing object is not an error.
    async fn remove(&self, key: &str) -> Result<(), ExportError>;

    /// Write `bytes` at `key`, overwriting any existing object.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError>;

    /// Public URL for `key`, without any freshness parameter.
    fn public_url(&self, key: &str) -> String;
}
