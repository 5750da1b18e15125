//! Service health and info endpoints

use super::SharedContext;
use crate::ComponentStatus;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Overall service health
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` or `degraded`
    pub status: String,
    /// Crate version
    pub version: String,
    /// RFC 3339 time of the check
    pub timestamp: String,
    /// Load state per component
    pub components: ComponentStatus,
}

/// Service name and entry points
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Service name
    pub name: String,
    /// Crate version
    pub version: String,
    /// One-line summary
    pub description: String,
    /// Endpoint name to path
    pub endpoints: BTreeMap<String, String>,
}

/// Health check
///
/// `ok` when every component loaded, `degraded` otherwise. Always 200: a
/// missing artifact only disables its own endpoints.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Per-component readiness", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(ctx): State<SharedContext>) -> Json<HealthResponse> {
    let components = ctx.status();
    let all = components.text && components.behaviour && components.bot_rf && components.bot_iso && components.xss;
    Json(HealthResponse {
        status: if all { "ok" } else { "degraded" }.into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        components,
    })
}

/// Service info
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service name and endpoints", body = ServiceInfo)
    ),
    tag = "health"
)]
pub async fn root() -> Json<ServiceInfo> {
    let endpoints = [
        ("health", "GET /health"),
        ("bilstm_predict", "POST /bilstm/predict"),
        ("behaviour_predict", "POST /behaviour/predict"),
        ("bot_supervised", "POST /bot/predict/supervised"),
        ("bot_unsupervised", "POST /bot/predict/unsupervised"),
        ("bot_batch", "POST /bot/predict/batch"),
        ("xss_predict", "POST /xss/predict"),
        ("xss_batch", "POST /xss/predict/batch"),
        ("extract_features", "POST /feature/extract_features"),
        ("openapi", "GET /openapi.json"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Json(ServiceInfo {
        name: "ThreatLens".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        description: "Pretrained payload, behaviour and bot-traffic classifiers".into(),
        endpoints,
    })
}
