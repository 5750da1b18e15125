//! XSS detector endpoints

use super::{ApiError, SharedContext};
use crate::inference::{XssPrediction, DEFAULT_THRESHOLD};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

/// Routes mounted under `/xss`
pub fn router() -> Router<SharedContext> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict/batch", post(predict_batch))
}

/// `?threshold=` query
#[derive(Debug, Deserialize)]
pub struct ThresholdParams {
    threshold: Option<f64>,
}

impl ThresholdParams {
    /// Requested threshold, default 0.5; must lie in [0, 1]
    fn resolve(&self) -> Result<f64, ApiError> {
        let threshold = self.threshold.unwrap_or(DEFAULT_THRESHOLD);
        if (0.0..=1.0).contains(&threshold) {
            Ok(threshold)
        } else {
            Err(ApiError::BadRequest(format!("threshold must be between 0 and 1, got {threshold}")))
        }
    }
}

/// XSS artifact status
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct XssHealth {
    /// `ok` or `missing-artifacts`
    pub status: String,
    /// Padding length saved with the tokenizer
    pub maxlen: Option<usize>,
}

/// Single payload
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct XssPredictRequest {
    /// The input string to classify for XSS risk
    pub payload: String,
}

/// Several payloads
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct XssBatchRequest {
    /// Input strings to classify
    pub payloads: Vec<String>,
}

/// Batch results with the threshold applied
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct XssBatchResponse {
    /// Results in input order
    pub results: Vec<XssPrediction>,
    /// Threshold used for `pred_label`
    pub threshold: f64,
}

/// XSS detector info
#[utoipa::path(
    get,
    path = "/xss",
    responses((status = 200, description = "Detector name and endpoints")),
    tag = "xss"
)]
pub async fn root() -> Json<Value> {
    Json(json!({
        "name": "XSS Detector",
        "endpoints": {
            "health": "/xss/health",
            "predict": "/xss/predict",
            "predict_batch": "/xss/predict/batch"
        },
        "message": "Use POST /xss/predict or POST /xss/predict/batch"
    }))
}

/// XSS artifact status
#[utoipa::path(
    get,
    path = "/xss/health",
    responses((status = 200, description = "Artifact status", body = XssHealth)),
    tag = "xss"
)]
pub async fn health(State(ctx): State<SharedContext>) -> Json<XssHealth> {
    Json(XssHealth {
        status: if ctx.xss.is_ready() { "ok" } else { "missing-artifacts" }.into(),
        maxlen: ctx.xss.saved_max_len(),
    })
}

/// Score one payload
#[utoipa::path(
    post,
    path = "/xss/predict",
    request_body = XssPredictRequest,
    params(("threshold" = Option<f64>, Query, description = "Decision threshold in [0, 1], default 0.5")),
    responses(
        (status = 200, description = "Probability and label", body = XssPrediction),
        (status = 400, description = "Threshold out of range", body = super::ErrorBody),
        (status = 500, description = "Model or tokenizer not loaded, or prediction failed", body = super::ErrorBody)
    ),
    tag = "xss"
)]
pub async fn predict(
    State(ctx): State<SharedContext>,
    Query(params): Query<ThresholdParams>,
    Json(req): Json<XssPredictRequest>,
) -> Result<Json<XssPrediction>, ApiError> {
    let threshold = params.resolve()?;
    ctx.xss.ensure_ready()?;

    let mut results = ctx.xss.predict(&[req.payload], threshold)?;
    results
        .pop()
        .map(Json)
        .ok_or(ApiError::Inference(crate::InferenceError::Output(0)))
}

/// Score several payloads
#[utoipa::path(
    post,
    path = "/xss/predict/batch",
    request_body = XssBatchRequest,
    params(("threshold" = Option<f64>, Query, description = "Decision threshold in [0, 1], default 0.5")),
    responses(
        (status = 200, description = "Results in input order", body = XssBatchResponse),
        (status = 400, description = "Empty batch or threshold out of range", body = super::ErrorBody),
        (status = 500, description = "Model or tokenizer not loaded, or prediction failed", body = super::ErrorBody)
    ),
    tag = "xss"
)]
pub async fn predict_batch(
    State(ctx): State<SharedContext>,
    Query(params): Query<ThresholdParams>,
    Json(req): Json<XssBatchRequest>,
) -> Result<Json<XssBatchResponse>, ApiError> {
    let threshold = params.resolve()?;
    ctx.xss.ensure_ready()?;
    if req.payloads.is_empty() {
        return Err(ApiError::BadRequest("payloads must be a non-empty list".into()));
    }

    let results = ctx.xss.predict(&req.payloads, threshold)?;
    Ok(Json(XssBatchResponse { results, threshold }))
}
