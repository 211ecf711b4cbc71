//! Reading Routes
//!
//! Time-series queries for one device.
//!
//! - GET /api/v1/devices/:id/readings  - Paged history
//! - GET /api/v1/devices/:id/latest    - Most recent reading
//! - GET /api/v1/devices/:id/aggregate - Hour / day buckets
//! - GET /api/v1/devices/:id/stats     - Summary (`?hours=` optional)

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::api::dto::{
    AggregateParams, AggregateResponse, LatestResponse, ReadingsParams, ReadingsResponse,
    StatsParams,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{ApiPath, ApiQuery};
use crate::api::state::AppState;
use crate::query::{DeviceStats, HistoryQuery};

/// Longest `?hours=` window accepted by the stats route (one year)
const MAX_STATS_HOURS: u32 = 24 * 366;

/// GET /api/v1/devices/:id/readings
pub async fn device_readings(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<ReadingsParams>,
) -> ApiResult<Json<ReadingsResponse>> {
    let device = state.registry.get(&device_id).await?;

    let query = HistoryQuery {
        since: params.since,
        until: params.until,
        limit: params.limit,
        offset: params.offset,
        order: params.order.unwrap_or_default(),
    };
    let readings = state.query.history(&device_id, query).await?;

    Ok(Json(ReadingsResponse {
        device_id,
        device_name: device.device_name,
        count: readings.len(),
        readings,
    }))
}

/// GET /api/v1/devices/:id/latest
///
/// `reading` is null until the device first reports.
pub async fn latest_reading(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
) -> ApiResult<Json<LatestResponse>> {
    let reading = state.query.latest(&device_id).await?;
    Ok(Json(LatestResponse { device_id, reading }))
}

/// GET /api/v1/devices/:id/aggregate
pub async fn aggregate_readings(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<AggregateParams>,
) -> ApiResult<Json<AggregateResponse>> {
    let bucket = params.bucket.unwrap_or_default();
    let buckets = state
        .query
        .aggregate(&device_id, bucket, params.since, params.until)
        .await?;

    Ok(Json(AggregateResponse {
        device_id,
        bucket,
        buckets,
    }))
}

/// GET /api/v1/devices/:id/stats
pub async fn device_stats(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<StatsParams>,
) -> ApiResult<Json<DeviceStats>> {
    let stats = match params.hours {
        None => state.query.stats(&device_id).await?,
        Some(0) => {
            return Err(ApiError::Validation(
                "hours must be at least 1".to_string(),
            ))
        }
        Some(hours) if hours > MAX_STATS_HOURS => {
            return Err(ApiError::Validation(format!(
                "hours must not exceed {}",
                MAX_STATS_HOURS
            )))
        }
        Some(hours) => {
            let since = Utc::now() - Duration::hours(i64::from(hours));
            state.query.stats_since(&device_id, since).await?
        }
    };

    Ok(Json(stats))
}
