//! Device Routes
//!
//! Registration and device management.
//!
//! - POST   /api/v1/register                 - Self-registration (upsert)
//! - GET    /api/v1/devices                  - List with latest readings
//! - POST   /api/v1/devices                  - Strict create (admin)
//! - GET    /api/v1/devices/:id              - Detail with latest reading
//! - PUT    /api/v1/devices/:id              - Update metadata / status (admin)
//! - DELETE /api/v1/devices/:id              - Hard delete (admin)
//! - POST   /api/v1/devices/:id/rotate-key   - Rotate API key (admin)

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::auth::AdminAccess;
use crate::api::dto::{
    DeviceListParams, DeviceListResponse, DeviceSummary, RegisterRequest, RegisterResponse,
    RotateKeyResponse, SuccessResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::state::AppState;
use crate::registry::{DeviceRegistration, RegisteredDevice, DEFAULT_PAGE_SIZE};
use crate::storage::{DeviceChanges, DeviceFilter};

/// POST /api/v1/register
///
/// Always 200; field firmware treats any other status as a failed
/// registration. `created` tells a new device (key included) from a
/// refreshed one (no key).
pub async fn register_device(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let registered = state.registry.register(registration(req)).await?;
    Ok(registered_response(StatusCode::OK, registered))
}

/// GET /api/v1/devices
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<DeviceListParams>,
) -> ApiResult<Json<DeviceListResponse>> {
    let filter = DeviceFilter {
        search: params.search.filter(|s| !s.trim().is_empty()),
        status: params.status,
        device_type: params.device_type,
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
    };

    let page = state.registry.list(filter).await?;

    let ids = page.items.iter().map(|d| d.device_id.clone()).collect();
    let mut latest = state.store.latest_readings(ids).await?;

    let devices = page
        .items
        .into_iter()
        .map(|device| {
            let latest_reading = latest.remove(&device.device_id);
            DeviceSummary {
                device,
                latest_reading,
            }
        })
        .collect();

    Ok(Json(DeviceListResponse {
        devices,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// POST /api/v1/devices
///
/// Administrative create; a duplicate `device_id` is a 409.
pub async fn create_device(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let status = req.status.unwrap_or_default();
    let registered = state.registry.create(registration(req), status).await?;
    Ok(registered_response(StatusCode::CREATED, registered))
}

/// GET /api/v1/devices/:id
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
) -> ApiResult<Json<DeviceSummary>> {
    let device = state.registry.get(&device_id).await?;
    let latest_reading = state.store.latest_reading(&device_id).await?;

    Ok(Json(DeviceSummary {
        device,
        latest_reading,
    }))
}

/// PUT /api/v1/devices/:id
pub async fn update_device(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
    ApiJson(changes): ApiJson<DeviceChanges>,
) -> ApiResult<Json<DeviceSummary>> {
    if changes.is_empty() {
        return Err(ApiError::Validation("No fields to update".to_string()));
    }

    let device = state.registry.update(&device_id, changes).await?;
    let latest_reading = state.store.latest_reading(&device_id).await?;

    Ok(Json(DeviceSummary {
        device,
        latest_reading,
    }))
}

/// DELETE /api/v1/devices/:id
///
/// Removes the device and its whole reading history.
pub async fn delete_device(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.registry.delete(&device_id).await?;

    Ok(Json(SuccessResponse {
        success: true,
        message: format!("Device '{}' deleted", device_id),
    }))
}

/// POST /api/v1/devices/:id/rotate-key
///
/// The old key stops working immediately.
pub async fn rotate_key(
    _admin: AdminAccess,
    State(state): State<Arc<AppState>>,
    ApiPath(device_id): ApiPath<String>,
) -> ApiResult<Json<RotateKeyResponse>> {
    let api_key = state.registry.rotate_key(&device_id).await?;

    Ok(Json(RotateKeyResponse {
        success: true,
        device_id,
        api_key,
    }))
}

fn registration(req: RegisterRequest) -> DeviceRegistration {
    DeviceRegistration {
        device_id: req.device_id,
        device_name: req.device_name,
        device_type: req.device_type,
        location: req.location,
    }
}

fn registered_response(
    status: StatusCode,
    registered: RegisteredDevice,
) -> (StatusCode, Json<RegisterResponse>) {
    (
        status,
        Json(RegisterResponse {
            success: true,
            device_id: registered.device.device_id.clone(),
            api_key: registered.api_key,
            created: registered.created,
            device: registered.device,
        }),
    )
}
