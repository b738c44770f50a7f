//! Geofence administration.
//!
//! A geofence is identified by its minor. Its beacons and events live
//! under `/api/geofences/{minor}`; all of these endpoints require the
//! administrator secret.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use geofencing_core::{Geofence, GeofenceRecord, Minor};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::api::error::ApiResult;
use crate::api::{beacons, events};
use crate::state::SharedState;

/// Creates the geofences router, including the beacon and event routes of
/// each geofence.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_geofences).post(create_geofence))
        .route("/{minor}", get(get_geofence).delete(remove_geofence))
        .route("/{minor}/counter", get(get_geofence_counter))
        .route(
            "/{minor}/beacons",
            get(beacons::list_beacons).post(beacons::add_beacon),
        )
        .route("/{minor}/beacons/generate", get(beacons::generate_beacon))
        .route(
            "/{minor}/beacons/{major}",
            get(beacons::get_beacon).delete(beacons::remove_beacon),
        )
        .route(
            "/{minor}/events",
            get(events::list_events).post(events::add_event),
        )
        .route(
            "/{minor}/events/{event_id}",
            get(events::get_event).delete(events::remove_event),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a geofence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "description": "Conference room" }))]
pub struct CreateGeofenceRequest {
    /// Human-readable description.
    #[schema(example = "Conference room")]
    pub description: String,
}

/// Response after creating a geofence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "minor": 3 }))]
pub struct CreateGeofenceResponse {
    /// Minor of the new geofence.
    pub minor: Minor,
}

/// Value of a counter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "value": 4 }))]
pub struct CounterValueResponse {
    /// Current value.
    pub value: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// List all geofences.
#[utoipa::path(
    get,
    path = "/api/geofences",
    tag = "geofences",
    operation_id = "listGeofences",
    summary = "List geofences",
    responses(
        (status = 200, description = "All geofences", body = Vec<GeofenceRecord>),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse)
    )
)]
pub async fn list_geofences(
    State(state): State<SharedState>,
    credential: Credential,
) -> ApiResult<Json<Vec<GeofenceRecord>>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().list_geofences()?))
}

/// Create a geofence.
#[utoipa::path(
    post,
    path = "/api/geofences",
    tag = "geofences",
    operation_id = "createGeofence",
    summary = "Create a geofence",
    description = "Creates an empty geofence. Minors are never reused, even after the \
        geofence holding one is deleted.",
    request_body = CreateGeofenceRequest,
    responses(
        (status = 201, description = "Geofence created", body = CreateGeofenceResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse)
    )
)]
pub async fn create_geofence(
    State(state): State<SharedState>,
    credential: Credential,
    Json(request): Json<CreateGeofenceRequest>,
) -> ApiResult<(StatusCode, Json<CreateGeofenceResponse>)> {
    credential.require_admin(state.engine())?;
    let minor = state.engine().add_geofence(request.description)?;
    Ok((StatusCode::CREATED, Json(CreateGeofenceResponse { minor })))
}

/// Get a geofence with its beacons and events.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}",
    tag = "geofences",
    operation_id = "getGeofence",
    summary = "Get a geofence",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "The geofence", body = Geofence),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn get_geofence(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<Json<Geofence>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().get_geofence(minor)?))
}

/// Delete an empty geofence.
#[utoipa::path(
    delete,
    path = "/api/geofences/{minor}",
    tag = "geofences",
    operation_id = "removeGeofence",
    summary = "Delete a geofence",
    description = "Deletes a geofence that no longer owns beacons or events.",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 204, description = "Geofence deleted"),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse),
        (status = 409, description = "Geofence still owns beacons or events", body = super::error::ErrorResponse)
    )
)]
pub async fn remove_geofence(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<StatusCode> {
    credential.require_admin(state.engine())?;
    state.engine().remove_geofence(minor)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Get the occupancy counter of a geofence.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/counter",
    tag = "geofences",
    operation_id = "getGeofenceCounter",
    summary = "Get the geofence counter",
    description = "Returns the value of the counter bound to the first geofence counter \
        event of the geofence: the number of devices currently inside.",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "Counter value", body = CounterValueResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "No geofence or no geofence counter", body = super::error::ErrorResponse)
    )
)]
pub async fn get_geofence_counter(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<Json<CounterValueResponse>> {
    credential.require_admin(state.engine())?;
    let value = state.engine().geofence_counter_value(minor)?;
    Ok(Json(CounterValueResponse { value }))
}
