//! `load_config`: builds the application configuration from an optional YAML
//! file and the process environment.
//!
//! The YAML file holds non-secret settings only. Environment variables
//! override the file, and secrets (`FIGMA_TOKEN`, `SUPABASE_KEY`,
//! `RUN_SECRET`) are read from the environment exclusively. An empty
//! environment variable counts as unset.
//!
//! # Accepted YAML
//! ```yaml
//! figma:
//!   url: https://www.figma.com/design/KEY/Doc
//!   file_key: KEY
//!   node_ids: ["1:2", "1:3"]
//!   format: png
//! session:
//!   cookies_path: ./cookies.json
//! storage:
//!   url: https://project.supabase.co
//!   bucket: public-exports
//! export:
//!   dir: ./exports
//!   prefix: figma
//! server:
//!   port: 3000
//! browser:
//!   executable: /usr/bin/chromium
//! timings:
//!   settle_delay_ms: 15000
//! ```
//!
//! # Errors
//! All failures are `anyhow::Error`s naming the offending file or variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use figma_sync_core::config::{
    parse_node_ids, DocumentRef, ExportConfig, ImageFormat, PublishConfig, SessionConfig, Timings,
};
use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_FIGMA_API_BASE: &str = "https://api.figma.com";
pub const DEFAULT_PORT: u16 = 3000;

/// Fully resolved configuration of the binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub export: ExportConfig,
    pub figma: FigmaSettings,
    pub storage: StorageSettings,
    pub server: ServerSettings,
    pub browser: BrowserSettings,
}

#[derive(Clone)]
pub struct FigmaSettings {
    pub token: String,
    pub api_base: String,
}

#[derive(Clone)]
pub struct StorageSettings {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

#[derive(Clone)]
pub struct ServerSettings {
    pub port: u16,
    /// Shared secret expected as `Authorization: Bearer <secret>` on `/run`.
    /// `None` disables the check.
    pub run_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub headless: bool,
}

impl std::fmt::Debug for FigmaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FigmaSettings")
            .field("token_len", &self.token.len())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("url", &self.url)
            .field("key_len", &self.key.len())
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("port", &self.port)
            .field("run_secret_set", &self.run_secret.is_some())
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    figma: FigmaSection,
    #[serde(default)]
    session: SessionSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    export: ExportSection,
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    browser: BrowserSection,
    #[serde(default)]
    timings: TimingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct FigmaSection {
    url: Option<String>,
    file_key: Option<String>,
    #[serde(default)]
    node_ids: Vec<String>,
    format: Option<ImageFormat>,
    api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    cookies_path: Option<PathBuf>,
    control_selector: Option<String>,
    control_text: Option<String>,
    busy_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSection {
    url: Option<String>,
    bucket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExportSection {
    dir: Option<PathBuf>,
    prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct BrowserSection {
    executable: Option<PathBuf>,
    headless: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct TimingsSection {
    navigation_timeout_ms: Option<u64>,
    control_search_ms: Option<u64>,
    sync_wait_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

impl TimingsSection {
    fn resolve(&self) -> Timings {
        let defaults = Timings::default();
        let pick = |ms: Option<u64>, default: Duration| ms.map(Duration::from_millis).unwrap_or(default);
        Timings {
            navigation_timeout: pick(self.navigation_timeout_ms, defaults.navigation_timeout),
            control_search: pick(self.control_search_ms, defaults.control_search),
            sync_wait: pick(self.sync_wait_ms, defaults.sync_wait),
            settle_delay: pick(self.settle_delay_ms, defaults.settle_delay),
            poll_interval: pick(self.poll_interval_ms, defaults.poll_interval),
        }
    }
}

/// Non-empty value of an environment variable.
fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &str, value: Option<String>, yaml_key: &str) -> Result<String> {
    value.ok_or_else(|| {
        error!(variable = name, "Required configuration value missing");
        anyhow!("{name} is not set (set the environment variable or `{yaml_key}` in the config file)")
    })
}

fn required_secret(name: &str) -> Result<String> {
    env_value(name).ok_or_else(|| {
        error!(variable = name, "Required secret missing from environment");
        anyhow!("{name} must be set in the environment")
    })
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;
    // An empty document deserializes to unit, not to an all-default mapping.
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow!("Failed to parse config YAML {:?}: {e}", path)
    })
}

/// Loads the optional YAML file at `path`, then applies environment
/// overrides and secrets.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let file = match path {
        Some(p) => read_file_config(p)?,
        None => FileConfig::default(),
    };

    let url = required("FIGMA_URL", env_value("FIGMA_URL").or(file.figma.url), "figma.url")?;
    let file_key = required(
        "FILE_KEY",
        env_value("FILE_KEY").or(file.figma.file_key),
        "figma.file_key",
    )?;
    let node_ids = match env_value("NODE_IDS") {
        Some(raw) => parse_node_ids(&raw),
        None => file
            .figma
            .node_ids
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    };
    let format = file.figma.format.unwrap_or_default();
    let document = DocumentRef::new(url, file_key, node_ids, format);

    let session_defaults = SessionConfig::default();
    let session = SessionConfig {
        cookies_path: env_value("COOKIES_PATH")
            .map(PathBuf::from)
            .or(file.session.cookies_path)
            .unwrap_or(session_defaults.cookies_path),
        control_selector: file
            .session
            .control_selector
            .unwrap_or(session_defaults.control_selector),
        control_text: file
            .session
            .control_text
            .unwrap_or(session_defaults.control_text),
        busy_text: file.session.busy_text.unwrap_or(session_defaults.busy_text),
    };

    let publish_defaults = PublishConfig::default();
    let publish = PublishConfig {
        export_dir: env_value("EXPORT_DIR")
            .map(PathBuf::from)
            .or(file.export.dir)
            .unwrap_or(publish_defaults.export_dir),
        prefix: file.export.prefix.unwrap_or(publish_defaults.prefix),
    };

    let storage = StorageSettings {
        url: required(
            "SUPABASE_URL",
            env_value("SUPABASE_URL").or(file.storage.url),
            "storage.url",
        )?,
        key: required_secret("SUPABASE_KEY")?,
        bucket: required(
            "BUCKET_NAME",
            env_value("BUCKET_NAME").or(file.storage.bucket),
            "storage.bucket",
        )?,
    };

    let figma = FigmaSettings {
        token: required_secret("FIGMA_TOKEN")?,
        api_base: file
            .figma
            .api_base
            .unwrap_or_else(|| DEFAULT_FIGMA_API_BASE.to_string()),
    };

    let port = match env_value("PORT") {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
        None => file.server.port.unwrap_or(DEFAULT_PORT),
    };
    let server = ServerSettings {
        port,
        run_secret: env_value("RUN_SECRET"),
    };

    let browser = BrowserSettings {
        executable: env_value("CHROME_PATH")
            .map(PathBuf::from)
            .or(file.browser.executable),
        headless: file.browser.headless.unwrap_or(true),
    };

    let config = AppConfig {
        export: ExportConfig {
            document,
            session,
            publish,
            timings: file.timings.resolve(),
        },
        figma,
        storage,
        server,
        browser,
    };
    config.export.trace_loaded();
    info!(
        bucket = %config.storage.bucket,
        port = config.server.port,
        run_secret_set = config.server.run_secret.is_some(),
        "Configuration loaded"
    );
    Ok(config)
}
