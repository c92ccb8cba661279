use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Node rendered when no node list is configured: the document root.
pub const DEFAULT_NODE_ID: &str = "0:1";

/// Everything one export run needs besides the external clients.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub document: DocumentRef,
    pub session: SessionConfig,
    pub publish: PublishConfig,
    pub timings: Timings,
}

impl ExportConfig {
    pub fn trace_loaded(&self) {
        info!(
            file_key = %self.document.file_key,
            nodes = self.document.node_ids.len(),
            format = self.document.format.as_str(),
            export_dir = %self.publish.export_dir.display(),
            "Loaded ExportConfig"
        );
        debug!(timings = ?self.timings, "Export timings");
    }
}

/// The document being synced and the nodes to export from it.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    /// Browser URL of the document.
    pub url: String,
    /// Provider-side document identifier.
    pub file_key: String,
    /// Never empty; see [`DocumentRef::new`].
    pub node_ids: Vec<String>,
    pub format: ImageFormat,
}

impl DocumentRef {
    /// Builds a document reference, falling back to the root node when
    /// `node_ids` is empty.
    pub fn new(
        url: impl Into<String>,
        file_key: impl Into<String>,
        node_ids: Vec<String>,
        format: ImageFormat,
    ) -> Self {
        let node_ids = if node_ids.is_empty() {
            vec![DEFAULT_NODE_ID.to_string()]
        } else {
            node_ids
        };
        Self {
            url: url.into(),
            file_key: file_key.into(),
            node_ids,
            format,
        }
    }
}

/// Parses a comma-separated node list. Blank entries are dropped; an empty
/// result falls back to the root node.
pub fn parse_node_ids(raw: &str) -> Vec<String> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if ids.is_empty() {
        vec![DEFAULT_NODE_ID.to_string()]
    } else {
        ids
    }
}

/// Render format requested from the provider. Also decides the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpg,
    Svg,
    Pdf,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
            ImageFormat::Svg => "svg",
            ImageFormat::Pdf => "pdf",
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpg" | "jpeg" => Ok(ImageFormat::Jpg),
            "svg" => Ok(ImageFormat::Svg),
            "pdf" => Ok(ImageFormat::Pdf),
            other => Err(format!("unsupported image format: {other}")),
        }
    }
}

/// Browser session inputs and the UI strings the automation keys on.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookies_path: PathBuf,
    /// CSS selector for the elements scanned when looking for the resync control.
    pub control_selector: String,
    /// Exact (trimmed) label of the resync control.
    pub control_text: String,
    /// Text shown while the sync is running; matched as a substring.
    pub busy_text: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookies_path: PathBuf::from("./cookies.json"),
            control_selector: "div.plugin_panel--relaunchButtonName--Ol-Gy div".to_string(),
            control_text: "Re-sync Google Sheets Data".to_string(),
            busy_text: "Fetching images".to_string(),
        }
    }
}

/// Where renders land locally and under which store prefix they are published.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Reused across runs, never cleared.
    pub export_dir: PathBuf,
    /// Namespace joined with the file name to form the object key.
    pub prefix: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./exports"),
            prefix: "figma".to_string(),
        }
    }
}

/// Time budgets of the browser phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub navigation_timeout: Duration,
    /// Budget for finding and clicking the resync control.
    pub control_search: Duration,
    /// Budget for the busy indicator to disappear.
    pub sync_wait: Duration,
    /// Fixed grace period after the busy indicator is gone. The provider
    /// exposes no signal for "backend committed the sync".
    pub settle_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            control_search: Duration::from_secs(30),
            sync_wait: Duration::from_secs(90),
            settle_delay: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
        }
    }
}
