// SBMS Exporter - HTTP surface
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! HTTP routes: landing page, telemetry, health and status.

use crate::metrics::{content_type, encode_metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::Registry;
use sbms::ExporterStats;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Application state shared across handlers.
pub struct AppState {
    pub registry: Arc<Registry>,
    pub stats: Arc<ExporterStats>,
    pub telemetry_path: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, stats: Arc<ExporterStats>, telemetry_path: String) -> Self {
        Self {
            registry,
            stats,
            telemetry_path,
            start_time: Instant::now(),
        }
    }
}

/// Build the router for `state`
pub fn router(state: Arc<AppState>) -> Router {
    let telemetry_path = state.telemetry_path.clone();
    Router::new()
        .route("/", get(root_handler))
        .route(&telemetry_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// Root handler - shows a simple HTML page.
async fn root_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>SBMS Exporter</title></head>
<body>
    <h1>SBMS Exporter</h1>
    <p><a href="{path}">Metrics</a></p>
    <p><a href="/status">Status</a></p>
</body>
</html>"#,
        path = state.telemetry_path
    ))
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match encode_metrics(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Status information response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub connected: bool,
    pub records_decoded: u64,
    pub records_rejected: u64,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: sbms::VERSION.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        connected: state.stats.is_connected(),
        records_decoded: state.stats.decoded(),
        records_rejected: state.stats.rejected(),
    })
}
