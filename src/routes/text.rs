//! SQL-injection text classifier endpoint

use super::{ApiError, SharedContext};
use crate::inference::TextPrediction;
use crate::normalize::TextInput;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Routes mounted under `/bilstm`
pub fn router() -> Router<SharedContext> {
    Router::new().route("/predict", post(predict))
}

/// Text classification request
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct TextPredictRequest {
    /// One text or a list of texts
    pub text: TextInput,
}

/// One result per input, in order
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct TextPredictResponse {
    /// Predictions in input order
    pub results: Vec<TextPrediction>,
}

/// Classify text as SQL injection or safe
#[utoipa::path(
    post,
    path = "/bilstm/predict",
    request_body = TextPredictRequest,
    responses(
        (status = 200, description = "One result per input, in order", body = TextPredictResponse),
        (status = 400, description = "Empty input", body = super::ErrorBody),
        (status = 500, description = "Model or tokenizer not loaded, or prediction failed", body = super::ErrorBody)
    ),
    tag = "bilstm"
)]
pub async fn predict(
    State(ctx): State<SharedContext>,
    Json(req): Json<TextPredictRequest>,
) -> Result<Json<TextPredictResponse>, ApiError> {
    ctx.text.ensure_ready()?;
    let texts = req.text.into_batch().ok_or_else(|| {
        ApiError::BadRequest("`text` must be a non-empty string or list of strings".into())
    })?;

    let results = ctx.text.predict(&texts)?;
    tracing::debug!(count = results.len(), "Classified texts");
    Ok(Json(TextPredictResponse { results }))
}
