//! Device registration and beacon reports.
//!
//! A device registers with a mail address and afterwards authenticates
//! with that address. Every beacon report carries the full set of beacons
//! the device currently observes; the engine diffs it against the previous
//! report and triggers the geofences that were entered or left.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use geofencing_core::{Beacon, BeaconChange, BeaconSet, Device, DeviceId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the devices router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_devices).post(register_device))
        .route("/{device_id}", get(get_device).delete(remove_device))
        .route("/{device_id}/beacons", put(update_beacons))
        .route("/{device_id}/token", put(update_token))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for registering a device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "address": "jane@example.org" }))]
pub struct RegisterDeviceRequest {
    /// Mail address identifying the device owner.
    #[schema(example = "jane@example.org")]
    pub address: String,
}

/// Response after registering a device.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "device_id": 3_735_928_559_u32 }))]
pub struct RegisterDeviceResponse {
    /// Identifier of the new device.
    pub device_id: DeviceId,
}

/// Request body for a beacon report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateBeaconsRequest {
    /// Every beacon the device currently observes.
    pub beacons: Vec<Beacon>,
}

/// Outcome of a beacon report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "changed": true,
    "entered": [{
        "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
        "major": 1,
        "minor": 2,
        "location": "Main entrance"
    }],
    "left": []
}))]
pub struct BeaconChangeResponse {
    /// Whether the report differed from the previous one.
    pub changed: bool,
    /// Registered beacons that appeared.
    pub entered: Vec<Beacon>,
    /// Registered beacons that disappeared.
    pub left: Vec<Beacon>,
}

impl From<Option<BeaconChange>> for BeaconChangeResponse {
    fn from(change: Option<BeaconChange>) -> Self {
        change.map_or_else(Self::default, |change| {
            let (entered, left) = change.into_parts();
            Self {
                changed: true,
                entered: entered.into_vec(),
                left: left.into_vec(),
            }
        })
    }
}

/// Request body for updating the push token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "token": "fcm-registration-token" }))]
pub struct UpdateTokenRequest {
    /// New push token, or `null` to stop device notifications.
    pub token: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List all registered devices.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List devices",
    responses(
        (status = 200, description = "All devices", body = Vec<Device>),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse)
    )
)]
pub async fn list_devices(
    State(state): State<SharedState>,
    credential: Credential,
) -> ApiResult<Json<Vec<Device>>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().list_devices()?))
}

/// Register a device.
#[utoipa::path(
    post,
    path = "/api/devices",
    tag = "devices",
    operation_id = "registerDevice",
    summary = "Register a device",
    description = "Registers a device under a mail address. The address is the device's \
        credential for every later request.",
    request_body = RegisterDeviceRequest,
    responses(
        (status = 201, description = "Device registered", body = RegisterDeviceResponse),
        (status = 400, description = "Malformed mail address", body = super::error::ErrorResponse),
        (status = 409, description = "Address already registered", body = super::error::ErrorResponse)
    )
)]
pub async fn register_device(
    State(state): State<SharedState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<RegisterDeviceResponse>)> {
    let device_id = state.engine().register_device(request.address.trim())?;
    Ok((StatusCode::CREATED, Json(RegisterDeviceResponse { device_id })))
}

/// Get a device.
#[utoipa::path(
    get,
    path = "/api/devices/{device_id}",
    tag = "devices",
    operation_id = "getDevice",
    summary = "Get a device",
    params(("device_id" = u32, Path, description = "Device identifier")),
    responses(
        (status = 200, description = "The device", body = Device),
        (status = 401, description = "Wrong credential", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown device", body = super::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<SharedState>,
    Path(device_id): Path<DeviceId>,
    credential: Credential,
) -> ApiResult<Json<Device>> {
    credential.require_device_or_admin(state.engine(), device_id)?;
    Ok(Json(state.engine().get_device(device_id)?))
}

/// Unregister a device.
#[utoipa::path(
    delete,
    path = "/api/devices/{device_id}",
    tag = "devices",
    operation_id = "removeDevice",
    summary = "Unregister a device",
    params(("device_id" = u32, Path, description = "Device identifier")),
    responses(
        (status = 204, description = "Device removed"),
        (status = 401, description = "Wrong credential", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown device", body = super::error::ErrorResponse)
    )
)]
pub async fn remove_device(
    State(state): State<SharedState>,
    Path(device_id): Path<DeviceId>,
    credential: Credential,
) -> ApiResult<StatusCode> {
    credential.require_device_or_admin(state.engine(), device_id)?;
    state.engine().remove_device(device_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Report the beacons a device currently observes.
#[utoipa::path(
    put,
    path = "/api/devices/{device_id}/beacons",
    tag = "devices",
    operation_id = "updateDeviceBeacons",
    summary = "Report observed beacons",
    description = "Replaces the device's beacon snapshot. Unknown beacons are ignored. \
        Geofences that were entered or left are triggered; failures of the resulting \
        actions are logged and never reported here.",
    params(("device_id" = u32, Path, description = "Device identifier")),
    request_body = UpdateBeaconsRequest,
    responses(
        (status = 200, description = "Report processed", body = BeaconChangeResponse),
        (status = 401, description = "Wrong credential", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown device", body = super::error::ErrorResponse)
    )
)]
pub async fn update_beacons(
    State(state): State<SharedState>,
    Path(device_id): Path<DeviceId>,
    credential: Credential,
    Json(request): Json<UpdateBeaconsRequest>,
) -> ApiResult<Json<BeaconChangeResponse>> {
    credential.require_device(state.engine(), device_id)?;
    let reported: BeaconSet = request.beacons.into_iter().collect();
    let change = state
        .engine()
        .update_device_beacons(device_id, reported)
        .await?;
    Ok(Json(change.into()))
}

/// Set or clear the push token of a device.
#[utoipa::path(
    put,
    path = "/api/devices/{device_id}/token",
    tag = "devices",
    operation_id = "updateDeviceToken",
    summary = "Update push token",
    params(("device_id" = u32, Path, description = "Device identifier")),
    request_body = UpdateTokenRequest,
    responses(
        (status = 204, description = "Token updated"),
        (status = 401, description = "Wrong credential", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown device", body = super::error::ErrorResponse)
    )
)]
pub async fn update_token(
    State(state): State<SharedState>,
    Path(device_id): Path<DeviceId>,
    credential: Credential,
    Json(request): Json<UpdateTokenRequest>,
) -> ApiResult<StatusCode> {
    credential.require_device(state.engine(), device_id)?;
    state.engine().update_push_token(device_id, request.token)?;
    Ok(StatusCode::NO_CONTENT)
}
