//! HTTP trigger for export runs.
//!
//! - `POST /run` checks `Authorization: Bearer <RUN_SECRET>` when a secret is
//!   configured, then performs one export. Runs are serialized: a request
//!   arriving while another run is in progress waits for it to finish. A
//!   started run completes even if the caller hangs up.
//! - `GET /` answers a liveness string.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::pipeline::ExportRunner;

pub const LIVENESS_TEXT: &str = "Figma Export Server is live!";

#[derive(Clone)]
struct ServerState {
    runner: Arc<dyn ExportRunner>,
    run_secret: Option<Arc<str>>,
    run_lock: Arc<Mutex<()>>,
}

/// Builds the trigger router. `run_secret` of `None` disables the bearer check.
pub fn router(runner: Arc<dyn ExportRunner>, run_secret: Option<String>) -> Router {
    let state = ServerState {
        runner,
        run_secret: run_secret.map(Arc::from),
        run_lock: Arc::new(Mutex::new(())),
    };
    Router::new()
        .route("/", get(liveness))
        .route("/run", post(run_export))
        .with_state(state)
}

/// Binds `0.0.0.0:<port>` and serves the trigger router until the process ends.
pub async fn serve(runner: Arc<dyn ExportRunner>, run_secret: Option<String>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(%addr, auth = run_secret.is_some(), "[SERVER] Listening");
    axum::serve(listener, router(runner, run_secret))
        .await
        .context("Server error")
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

async fn run_export(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.run_secret.as_deref() {
        if !authorized(&headers, secret) {
            warn!("[SERVER] Rejected /run with a missing or wrong bearer token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response();
        }
    }

    // The spawned run holds the lock; dropping this handler does not cancel it.
    let guard = state.run_lock.clone().lock_owned().await;
    let runner = state.runner.clone();
    info!("[SERVER] Export run triggered");
    let run = tokio::spawn(async move {
        let outcome = runner.run().await;
        drop(guard);
        outcome
    });

    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "[SERVER] Export task aborted");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": format!("export task aborted: {e}"), "published": [] })),
            )
                .into_response();
        }
    };

    match outcome {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "success": true, "urls": report.urls() })),
        )
            .into_response(),
        Err(failure) => {
            error!(stage = %failure.stage, error = %failure, "[SERVER] Export run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": failure.to_string(),
                    "stage": failure.stage,
                    "published": failure.published_urls(),
                })),
            )
                .into_response()
        }
    }
}
