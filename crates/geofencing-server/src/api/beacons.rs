//! Beacon administration and beacon descriptions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use geofencing_core::{Beacon, Major, Minor};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the router for endpoints not tied to one geofence.
///
/// Per-geofence beacon routes are mounted by the geofences router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/describe", post(describe_beacons))
}

/// Response after adding a beacon.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "added": true }))]
pub struct AddBeaconResponse {
    /// `false` if the beacon exists already or belongs to another
    /// installation or geofence.
    pub added: bool,
}

/// Request body for describing beacons.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DescribeBeaconsRequest {
    /// Beacons to describe.
    pub beacons: Vec<Beacon>,
}

/// List the beacons of a geofence.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/beacons",
    tag = "beacons",
    operation_id = "listBeacons",
    summary = "List beacons of a geofence",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "Beacons of the geofence", body = Vec<Beacon>),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn list_beacons(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<Json<Vec<Beacon>>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().list_beacons(minor)?))
}

/// Register a beacon in a geofence.
#[utoipa::path(
    post,
    path = "/api/geofences/{minor}/beacons",
    tag = "beacons",
    operation_id = "addBeacon",
    summary = "Add a beacon",
    description = "Registers a beacon, usually one obtained from the generate endpoint. \
        Returns `added: false` if it exists already, its UUID is not the installation's \
        or its minor is not the geofence's.",
    params(("minor" = u16, Path, description = "Geofence minor")),
    request_body = Beacon,
    responses(
        (status = 200, description = "Add result", body = AddBeaconResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn add_beacon(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
    Json(beacon): Json<Beacon>,
) -> ApiResult<Json<AddBeaconResponse>> {
    credential.require_admin(state.engine())?;
    let added = state.engine().add_beacon(minor, beacon)?;
    Ok(Json(AddBeaconResponse { added }))
}

/// Generate the next beacon of a geofence.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/beacons/generate",
    tag = "beacons",
    operation_id = "generateBeacon",
    summary = "Generate a beacon",
    description = "Returns a beacon with the installation UUID, the geofence minor and a \
        major never used in this geofence. The beacon is not registered.",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "Generated beacon", body = Beacon),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn generate_beacon(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<Json<Beacon>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().generate_beacon(minor)?))
}

/// Get a beacon.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/beacons/{major}",
    tag = "beacons",
    operation_id = "getBeacon",
    summary = "Get a beacon",
    params(
        ("minor" = u16, Path, description = "Geofence minor"),
        ("major" = u16, Path, description = "Beacon major")
    ),
    responses(
        (status = 200, description = "The beacon", body = Beacon),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown beacon", body = super::error::ErrorResponse)
    )
)]
pub async fn get_beacon(
    State(state): State<SharedState>,
    Path((minor, major)): Path<(Minor, Major)>,
    credential: Credential,
) -> ApiResult<Json<Beacon>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().get_beacon(minor, major)?))
}

/// Unregister a beacon.
#[utoipa::path(
    delete,
    path = "/api/geofences/{minor}/beacons/{major}",
    tag = "beacons",
    operation_id = "removeBeacon",
    summary = "Remove a beacon",
    params(
        ("minor" = u16, Path, description = "Geofence minor"),
        ("major" = u16, Path, description = "Beacon major")
    ),
    responses(
        (status = 204, description = "Beacon removed"),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown beacon", body = super::error::ErrorResponse)
    )
)]
pub async fn remove_beacon(
    State(state): State<SharedState>,
    Path((minor, major)): Path<(Minor, Major)>,
    credential: Credential,
) -> ApiResult<StatusCode> {
    credential.require_admin(state.engine())?;
    state.engine().remove_beacon(minor, major)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Attach location labels to beacons.
#[utoipa::path(
    post,
    path = "/api/beacons/describe",
    tag = "beacons",
    operation_id = "describeBeacons",
    summary = "Describe beacons",
    description = "Returns the given beacons with their stored location labels. Unknown \
        beacons are returned unchanged. Open to administrators and registered devices.",
    request_body = DescribeBeaconsRequest,
    responses(
        (status = 200, description = "Described beacons", body = Vec<Beacon>),
        (status = 401, description = "Unknown credential", body = super::error::ErrorResponse)
    )
)]
pub async fn describe_beacons(
    State(state): State<SharedState>,
    credential: Credential,
    Json(request): Json<DescribeBeaconsRequest>,
) -> ApiResult<Json<Vec<Beacon>>> {
    credential.require_any_device_or_admin(state.engine())?;
    Ok(Json(state.engine().describe_beacons(request.beacons)?))
}
