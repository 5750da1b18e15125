//! Feature extraction endpoint

use super::SharedContext;
use crate::features::{ExtractRequest, FeatureReport};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

/// Routes mounted under `/feature`
pub fn router() -> Router<SharedContext> {
    Router::new().route("/extract_features", post(extract_features))
}

/// Extract tokens, entropy, GeoIP and IP reputation from a payload
///
/// The body is read leniently: anything that is not a JSON object with
/// string fields degrades to empty values.
#[utoipa::path(
    post,
    path = "/feature/extract_features",
    request_body = ExtractRequest,
    responses((status = 200, description = "Complete feature report", body = FeatureReport)),
    tag = "feature"
)]
pub async fn extract_features(State(ctx): State<SharedContext>, body: Bytes) -> Json<FeatureReport> {
    let req = ExtractRequest::from_body(&body);
    Json(ctx.extractor.extract(&req).await)
}
