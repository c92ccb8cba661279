//! # figma-sync CLI
//!
//! Command parsing and dispatch for the `figma-sync` binary. All pipeline
//! logic lives in `figma-sync-core`; this module only loads configuration,
//! builds the concrete clients and hands them over.
//!
//! - `run`: perform one export and print the published URLs as JSON.
//! - `serve`: start the HTTP trigger server.
//!
//! For programmatic and integration use, call [`run`] with a constructed [`Cli`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::load_config::load_config;
use crate::pipeline::{ExportRunner, Pipeline};
use crate::server;

/// CLI for figma-sync: resync a Figma document and publish its renders.
#[derive(Parser)]
#[clap(
    name = "figma-sync",
    version,
    about = "Resync a Figma document through its plugin panel and publish node renders to object storage"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform one export run and print the published URLs
    Run {
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Serve `POST /run` to trigger export runs over HTTP
    Serve {
        /// Path to an optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Listening port, overrides PORT and the config file
        #[clap(long)]
        port: Option<u16>,
    },
}

/// Async CLI entrypoint shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "run", "Starting export run");
            let pipeline = Pipeline::from_config(&config);
            match pipeline.run().await {
                Ok(report) => {
                    tracing::info!(command = "run", version = %report.version, "Export run complete");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({ "success": true, "urls": report.urls() }))?
                    );
                    Ok(())
                }
                Err(failure) => {
                    tracing::error!(command = "run", stage = %failure.stage, error = %failure, "Export run failed");
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "success": false,
                            "message": failure.to_string(),
                            "published": failure.published_urls(),
                        }))?
                    );
                    Err(anyhow::Error::new(failure))
                }
            }
        }
        Commands::Serve { config, port } => {
            let config = load_config(config.as_deref())?;
            let port = port.unwrap_or(config.server.port);
            tracing::info!(command = "serve", port, "Starting trigger server");
            let runner: Arc<dyn ExportRunner> = Arc::new(Pipeline::from_config(&config));
            server::serve(runner, config.server.run_secret.clone(), port).await
        }
    }
}
