//! Admin API for Blob Relay

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::{Relay, RelayStats};

/// Health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Stats response
#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: RelayStats,
    pub uptime_seconds: i64,
    pub backends: Vec<&'static str>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn live() -> &'static str {
    "OK"
}

/// Ready once at least one storage backend is configured
async fn ready(State(relay): State<Arc<Relay>>) -> (StatusCode, &'static str) {
    if relay.storage().is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "no storage backends configured")
    } else {
        (StatusCode::OK, "OK")
    }
}

async fn stats(State(relay): State<Arc<Relay>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: relay.stats(),
        uptime_seconds: (Utc::now() - relay.started_at()).num_seconds(),
        backends: relay.storage().kinds().iter().map(|k| k.as_str()).collect(),
    })
}

/// Health and stats routes
pub fn admin_routes() -> Router<Arc<Relay>> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
}
