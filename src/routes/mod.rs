//! HTTP routes
//!
//! One router per served model, nested under its prefix, plus service-level
//! health and the OpenAPI document.

pub mod behaviour;
pub mod bot;
pub mod features;
pub mod health;
pub mod text;
pub mod xss;

use crate::inference::UnknownModelType;
use crate::{InferenceContext, InferenceError, ServeError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

/// Handler state
pub type SharedContext = Arc<InferenceContext>;

/// Error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Short description
    pub detail: String,
}

/// Request failure mapped to an HTTP status
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid input (400)
    #[error("{0}")]
    BadRequest(String),
    /// Artifact missing, reported as 500
    #[error("{0} not loaded")]
    Unavailable(&'static str),
    /// Artifact missing, reported as 503
    #[error("{0} not loaded")]
    ServiceUnavailable(&'static str),
    /// Model call failed (500, detail not echoed)
    #[error("Model prediction failed")]
    Inference(#[source] InferenceError),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) | ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Like `From<ServeError>`, but a missing artifact is a 503
    pub fn service_unavailable(err: ServeError) -> Self {
        match err {
            ServeError::Unavailable(name) => ApiError::ServiceUnavailable(name),
            other => other.into(),
        }
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::Unavailable(name) => ApiError::Unavailable(name),
            ServeError::Inference(e) => ApiError::Inference(e),
        }
    }
}

impl From<UnknownModelType> for ApiError {
    fn from(err: UnknownModelType) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Inference(cause) => tracing::error!("Model prediction failed: {}", cause),
            ApiError::Unavailable(_) | ApiError::ServiceUnavailable(_) => {
                tracing::warn!("Request rejected: {}", self)
            }
            ApiError::BadRequest(_) => tracing::debug!("Bad request: {}", self),
        }
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "ThreatLens",
        description = "Pretrained payload, behaviour and bot-traffic classifiers with a feature extractor"
    ),
    paths(
        health::root,
        health::health_check,
        text::predict,
        behaviour::predict,
        bot::health,
        bot::predict_supervised,
        bot::predict_unsupervised,
        bot::predict_batch,
        xss::root,
        xss::health,
        xss::predict,
        xss::predict_batch,
        features::extract_features,
    ),
    components(
        schemas(
            ErrorBody, crate::ComponentStatus,
            health::HealthResponse, health::ServiceInfo,
            text::TextPredictRequest, text::TextPredictResponse,
            crate::normalize::TextInput,
            crate::inference::TextPrediction, crate::inference::TextLabel,
            behaviour::BehaviourPredictRequest, behaviour::BehaviourPredictResponse,
            crate::normalize::SessionInput, crate::normalize::SessionEvent,
            crate::inference::SessionPrediction,
            crate::normalize::TrafficFlow,
            bot::BotHealth, bot::BatchPredictionRequest, bot::BatchPredictionResponse,
            crate::inference::BotPrediction, crate::inference::BotModel,
            crate::inference::TrafficLabel, crate::inference::ConfidenceKind,
            xss::XssHealth, xss::XssPredictRequest, xss::XssBatchRequest, xss::XssBatchResponse,
            crate::inference::XssPrediction,
            crate::features::ExtractRequest, crate::features::FeatureReport,
            crate::features::GeoRecord
        )
    ),
    tags(
        (name = "health", description = "Service health"),
        (name = "bilstm", description = "SQL-injection text classifier"),
        (name = "behaviour", description = "Session behaviour classifier"),
        (name = "bot", description = "Bot traffic detection"),
        (name = "xss", description = "XSS payload detection"),
        (name = "feature", description = "Payload and client feature extraction")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the service router
pub fn build_router(context: SharedContext) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/openapi.json", get(openapi_json))
        .nest("/bilstm", text::router())
        .nest("/behaviour", behaviour::router())
        .nest("/bot", bot::router())
        .nest("/xss", xss::router())
        .nest("/feature", features::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}
