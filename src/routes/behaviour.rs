//! Session behaviour classifier endpoint

use super::{ApiError, SharedContext};
use crate::inference::SessionPrediction;
use crate::normalize::SessionInput;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Routes mounted under `/behaviour`
pub fn router() -> Router<SharedContext> {
    Router::new().route("/predict", post(predict))
}

/// Sessions to score
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BehaviourPredictRequest {
    /// Sessions in caller order
    pub sessions: Vec<SessionInput>,
}

/// One prediction per session
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BehaviourPredictResponse {
    /// Predictions in input order
    pub predictions: Vec<SessionPrediction>,
}

/// Score user sessions
#[utoipa::path(
    post,
    path = "/behaviour/predict",
    request_body = BehaviourPredictRequest,
    responses(
        (status = 200, description = "One prediction per session, in order", body = BehaviourPredictResponse),
        (status = 400, description = "No sessions", body = super::ErrorBody),
        (status = 500, description = "Model or encoder not loaded, or prediction failed", body = super::ErrorBody)
    ),
    tag = "behaviour"
)]
pub async fn predict(
    State(ctx): State<SharedContext>,
    Json(req): Json<BehaviourPredictRequest>,
) -> Result<Json<BehaviourPredictResponse>, ApiError> {
    ctx.behaviour.ensure_ready()?;
    if req.sessions.is_empty() {
        return Err(ApiError::BadRequest("No sessions provided".into()));
    }

    let predictions = ctx.behaviour.predict(&req.sessions)?;
    Ok(Json(BehaviourPredictResponse { predictions }))
}
