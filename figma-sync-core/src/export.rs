//! High-level pipeline: resync the document in a browser, then render and
//! publish its nodes.
//!
//! A run is a strictly linear state machine:
//!
//! ```text
//! INIT → SESSION_OPEN → CONTROL_SEARCH → CONTROL_ACTIVATED → SYNC_WAIT
//!      → SYNC_SETTLED → VERSION_FETCHED → RENDERING → PUBLISHING → COMPLETE
//! ```
//!
//! Stages only move forward: once the first render is published the run
//! stays in `PUBLISHING` while the remaining nodes download. Any stage error
//! moves the run to `FAILED` and is returned unmodified inside a
//! [`RunFailure`] that names the stage it failed in. Nothing is retried and nothing already published is
//! rolled back; the failure lists what was published so far.
//!
//! # Responsibilities
//! - Releases the browser on every exit path of the browser phase, before
//!   the provider API is touched.
//! - Fetches the document version once, after the sync has settled, and
//!   uses it for every node of the run.
//! - Writes each render to the export directory before publishing it.
//!
//! # Not handled here
//! The cookie file and export directory are shared by every run in the
//! process. This module takes no lock; callers that can start runs
//! concurrently must serialize them (the trigger server does).

use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::ExportConfig;
use crate::contract::{BrowserLauncher, ObjectStore, PublishedArtifact, RenderApi};
use crate::error::{ExportError, RunFailure};
use crate::publish::{artifact_file_name, fresh_timestamp_millis, ArtifactPublisher};
use crate::render::{download_image, fetch_renders, fetch_version};
use crate::session::{load_session_cookies, open_authenticated_session, SessionHandle};

/// States of one export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportStage {
    Init,
    SessionOpen,
    ControlSearch,
    ControlActivated,
    SyncWait,
    SyncSettled,
    VersionFetched,
    Rendering,
    Publishing,
    Complete,
    Failed,
}

impl ExportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStage::Init => "INIT",
            ExportStage::SessionOpen => "SESSION_OPEN",
            ExportStage::ControlSearch => "CONTROL_SEARCH",
            ExportStage::ControlActivated => "CONTROL_ACTIVATED",
            ExportStage::SyncWait => "SYNC_WAIT",
            ExportStage::SyncSettled => "SYNC_SETTLED",
            ExportStage::VersionFetched => "VERSION_FETCHED",
            ExportStage::Rendering => "RENDERING",
            ExportStage::Publishing => "PUBLISHING",
            ExportStage::Complete => "COMPLETE",
            ExportStage::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// The single document version every node was rendered at.
    pub version: String,
    /// One artifact per exported node, in render order.
    pub artifacts: Vec<PublishedArtifact>,
}

impl ExportReport {
    pub fn urls(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.public_url.clone()).collect()
    }
}

struct RunTracker {
    stage: ExportStage,
    published: Vec<PublishedArtifact>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            stage: ExportStage::Init,
            published: Vec::new(),
        }
    }

    fn advance(&mut self, next: ExportStage) {
        if self.stage != next {
            info!(from = %self.stage, to = %next, "[EXPORT] Stage transition");
            self.stage = next;
        }
    }

    /// Moves to `FAILED`; the returned failure names the stage the run died in.
    fn fail(mut self, error: ExportError) -> RunFailure {
        let failed_in = self.stage;
        self.advance(ExportStage::Failed);
        error!(stage = %failed_in, error = %error, published = self.published.len(), "[EXPORT][ERROR] Run failed");
        if !self.published.is_empty() {
            warn!(
                urls = ?self.published.iter().map(|a| a.public_url.as_str()).collect::<Vec<_>>(),
                "[EXPORT] Artifacts published before the failure stay in the store"
            );
        }
        RunFailure {
            stage: failed_in,
            error,
            published: self.published,
        }
    }
}

/// Runs one full export: resync in the browser, then render and publish
/// every configured node.
pub async fn export<B, A, S>(
    config: &ExportConfig,
    launcher: &B,
    api: &A,
    store: &S,
) -> Result<ExportReport, RunFailure>
where
    B: BrowserLauncher + ?Sized,
    A: RenderApi + ?Sized,
    S: ObjectStore + ?Sized,
{
    info!(
        file_key = %config.document.file_key,
        nodes = config.document.node_ids.len(),
        "[EXPORT] Starting export run"
    );
    let mut run = RunTracker::new();

    if let Err(e) = browser_phase(config, launcher, &mut run).await {
        return Err(run.fail(e));
    }

    match publish_phase(config, api, store, &mut run).await {
        Ok(version) => {
            run.advance(ExportStage::Complete);
            info!(version = %version, artifacts = run.published.len(), "[EXPORT] Export run complete");
            Ok(ExportReport {
                version,
                artifacts: run.published,
            })
        }
        Err(e) => Err(run.fail(e)),
    }
}

async fn browser_phase<B>(
    config: &ExportConfig,
    launcher: &B,
    run: &mut RunTracker,
) -> Result<(), ExportError>
where
    B: BrowserLauncher + ?Sized,
{
    let cookies = load_session_cookies(&config.session.cookies_path).await?;
    let session = open_authenticated_session(
        launcher,
        &config.document.url,
        cookies,
        config.timings.navigation_timeout,
    )
    .await?;
    run.advance(ExportStage::SessionOpen);

    let outcome = resync(&session, config, run).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "[EXPORT] Browser close failed");
    }
    outcome
}

async fn resync(
    session: &SessionHandle,
    config: &ExportConfig,
    run: &mut RunTracker,
) -> Result<(), ExportError> {
    let timings = &config.timings;

    run.advance(ExportStage::ControlSearch);
    session
        .activate_control(
            &config.session.control_selector,
            &config.session.control_text,
            timings.control_search,
            timings.poll_interval,
        )
        .await?;
    run.advance(ExportStage::ControlActivated);

    run.advance(ExportStage::SyncWait);
    session
        .await_completion(
            &config.session.busy_text,
            timings.sync_wait,
            timings.poll_interval,
        )
        .await?;

    info!(
        settle_ms = timings.settle_delay.as_millis() as u64,
        "[EXPORT] Sync finished, waiting for the backend to catch up"
    );
    sleep(timings.settle_delay).await;
    run.advance(ExportStage::SyncSettled);
    Ok(())
}

async fn publish_phase<A, S>(
    config: &ExportConfig,
    api: &A,
    store: &S,
    run: &mut RunTracker,
) -> Result<String, ExportError>
where
    A: RenderApi + ?Sized,
    S: ObjectStore + ?Sized,
{
    let document = &config.document;

    let version = fetch_version(api, &document.file_key).await?;
    run.advance(ExportStage::VersionFetched);

    let renders = fetch_renders(
        api,
        &document.file_key,
        &document.node_ids,
        &version,
        document.format,
    )
    .await?;
    run.advance(ExportStage::Rendering);

    let export_dir = &config.publish.export_dir;
    tokio::fs::create_dir_all(export_dir)
        .await
        .map_err(|source| ExportError::ExportDir {
            path: export_dir.clone(),
            source,
        })?;

    let publisher = ArtifactPublisher::new(store, config.publish.prefix.clone());
    for source in &renders {
        let bytes = download_image(api, source).await?;

        let file_name =
            artifact_file_name(&source.node_id, fresh_timestamp_millis(), document.format);
        let path = export_dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ExportError::ExportDir {
                path: path.clone(),
                source: e,
            })?;

        run.advance(ExportStage::Publishing);
        let artifact = publisher.publish(bytes, &file_name).await?;
        info!(node_id = %source.node_id, url = %artifact.public_url, "[EXPORT] Published node");
        run.published.push(artifact);
    }

    Ok(version)
}
