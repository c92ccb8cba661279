//! Wires the concrete clients into the core export pipeline.

use async_trait::async_trait;
use figma_sync_core::config::ExportConfig;
use figma_sync_core::{export, ExportReport, RunFailure};

use crate::browser::ChromiumLauncher;
use crate::figma::FigmaClient;
use crate::load_config::AppConfig;
use crate::storage::SupabaseStorage;

/// Starts one export run. The trigger server only knows this trait.
#[async_trait]
pub trait ExportRunner: Send + Sync {
    async fn run(&self) -> Result<ExportReport, RunFailure>;
}

/// Production runner: headless Chromium, the Figma REST API and Supabase Storage.
pub struct Pipeline {
    config: ExportConfig,
    launcher: ChromiumLauncher,
    api: FigmaClient,
    store: SupabaseStorage,
}

impl Pipeline {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            config: config.export.clone(),
            launcher: ChromiumLauncher::new(
                &config.browser,
                config.export.timings.navigation_timeout,
            ),
            api: FigmaClient::new(config.figma.token.clone(), config.figma.api_base.clone()),
            store: SupabaseStorage::new(
                config.storage.url.clone(),
                config.storage.key.clone(),
                config.storage.bucket.clone(),
            ),
        }
    }
}

#[async_trait]
impl ExportRunner for Pipeline {
    async fn run(&self) -> Result<ExportReport, RunFailure> {
        export(&self.config, &self.launcher, &self.api, &self.store).await
    }
}
