//! Bot detection endpoints
//!
//! Unlike the other services a missing model answers 503.

use super::{ApiError, SharedContext};
use crate::inference::{BotModel, BotPrediction};
use crate::normalize::TrafficFlow;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Routes mounted under `/bot`
pub fn router() -> Router<SharedContext> {
    Router::new()
        .route("/health", get(health))
        .route("/predict/supervised", post(predict_supervised))
        .route("/predict/unsupervised", post(predict_unsupervised))
        .route("/predict/batch", post(predict_batch))
}

/// Loaded state of each detector
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BotHealth {
    /// Always `ok` while the server runs
    pub status: String,
    /// RandomForest and its scaler loaded
    pub rf_loaded: bool,
    /// IsolationForest and its scaler loaded
    pub iso_loaded: bool,
}

/// Flows scored with one model
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BatchPredictionRequest {
    /// Flows to classify
    pub flows: Vec<TrafficFlow>,
    /// `rf` (default) or `iso`
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

fn default_model_type() -> String {
    BotModel::Rf.as_str().into()
}

/// Batch predictions
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BatchPredictionResponse {
    /// Predictions in input order
    pub predictions: Vec<BotPrediction>,
    /// Number of predictions
    pub total: usize,
}

/// Bot model availability
#[utoipa::path(
    get,
    path = "/bot/health",
    responses((status = 200, description = "Which detectors are loaded", body = BotHealth)),
    tag = "bot"
)]
pub async fn health(State(ctx): State<SharedContext>) -> Json<BotHealth> {
    Json(BotHealth {
        status: "ok".into(),
        rf_loaded: ctx.bot.rf_loaded(),
        iso_loaded: ctx.bot.iso_loaded(),
    })
}

/// Classify one flow with the RandomForest
#[utoipa::path(
    post,
    path = "/bot/predict/supervised",
    request_body = TrafficFlow,
    responses(
        (status = 200, description = "Prediction, confidence is a probability", body = BotPrediction),
        (status = 503, description = "RandomForest model not loaded", body = super::ErrorBody)
    ),
    tag = "bot"
)]
pub async fn predict_supervised(
    State(ctx): State<SharedContext>,
    Json(flow): Json<TrafficFlow>,
) -> Result<Json<BotPrediction>, ApiError> {
    ctx.bot
        .predict(BotModel::Rf, &flow)
        .map(Json)
        .map_err(ApiError::service_unavailable)
}

/// Classify one flow with the IsolationForest
#[utoipa::path(
    post,
    path = "/bot/predict/unsupervised",
    request_body = TrafficFlow,
    responses(
        (status = 200, description = "Prediction, confidence is an anomaly magnitude", body = BotPrediction),
        (status = 503, description = "IsolationForest model not loaded", body = super::ErrorBody)
    ),
    tag = "bot"
)]
pub async fn predict_unsupervised(
    State(ctx): State<SharedContext>,
    Json(flow): Json<TrafficFlow>,
) -> Result<Json<BotPrediction>, ApiError> {
    ctx.bot
        .predict(BotModel::Iso, &flow)
        .map(Json)
        .map_err(ApiError::service_unavailable)
}

/// Classify several flows with one model
#[utoipa::path(
    post,
    path = "/bot/predict/batch",
    request_body = BatchPredictionRequest,
    responses(
        (status = 200, description = "Predictions in input order", body = BatchPredictionResponse),
        (status = 400, description = "Unknown model_type", body = super::ErrorBody),
        (status = 503, description = "Requested model not loaded", body = super::ErrorBody)
    ),
    tag = "bot"
)]
pub async fn predict_batch(
    State(ctx): State<SharedContext>,
    Json(req): Json<BatchPredictionRequest>,
) -> Result<Json<BatchPredictionResponse>, ApiError> {
    let model: BotModel = req.model_type.parse()?;

    let predictions = ctx
        .bot
        .predict_batch(model, &req.flows)
        .map_err(ApiError::service_unavailable)?;
    let total = predictions.len();
    Ok(Json(BatchPredictionResponse { predictions, total }))
}
