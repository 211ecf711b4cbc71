//! Ingest Routes
//!
//! - POST /api/v1/submit - A device reports one reading

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{SubmitRequest, SubmitResponse};
use crate::api::error::ApiResult;
use crate::api::extract::ApiJson;
use crate::api::state::AppState;

/// POST /api/v1/submit
///
/// Responds 200 on success; deployed firmware checks for exactly that.
pub async fn submit_reading(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SubmitRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    let reading = state
        .ingest
        .submit(&req.device_id, &req.api_key, req.channels)
        .await?;

    Ok(Json(SubmitResponse {
        success: true,
        reading_id: reading.id,
        timestamp: reading.timestamp,
    }))
}
