//! Overview Route
//!
//! - GET /api/v1/overview - Fleet summary for the dashboard

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::query::Overview;

/// GET /api/v1/overview
pub async fn overview(State(state): State<Arc<AppState>>) -> ApiResult<Json<Overview>> {
    Ok(Json(state.query.overview().await?))
}
