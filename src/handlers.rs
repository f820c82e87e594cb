use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::throttler::Throttler;

/// Shared application state
pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub throttler: Arc<Throttler>,
    pub trust_forwarded_headers: bool,
}

impl AppState {
    pub fn new(throttler: Arc<Throttler>, trust_forwarded_headers: bool) -> SharedState {
        Arc::new(Self {
            throttler,
            trust_forwarded_headers,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
}

/// Liveness: the process is up.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.throttler.backend().to_string(),
    })
}

/// Readiness: the trial store answers.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let backend = state.throttler.backend();
    match state.throttler.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": backend,
            })),
        ),
        Err(err) => {
            tracing::warn!(error = %err, backend, "store not reachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": backend,
                })),
            )
        }
    }
}

/// Placeholder for the resource routes mounted behind the gate.
pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "not_found",
            "message": "No route for this path",
        })),
    )
}
