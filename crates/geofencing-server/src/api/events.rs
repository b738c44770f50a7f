//! Event administration.
//!
//! Adding an event runs its add hook: counter events get a counter, mail
//! events start the opt-in of their recipient and notification events
//! check the push settings. An event whose hook fails is discarded and the
//! response carries `event_id: null`; the reason is in the server log.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use geofencing_core::{Event, EventId, EventListing, Minor, NewEvent};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Response after adding an event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "event_id": 1 }))]
pub struct AddEventResponse {
    /// Identifier of the new event, `null` if it was discarded.
    pub event_id: Option<EventId>,
}

/// List the events of a geofence.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/events",
    tag = "events",
    operation_id = "listEvents",
    summary = "List events of a geofence",
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "Events in evaluation order", body = Vec<EventListing>),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn list_events(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
) -> ApiResult<Json<Vec<EventListing>>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().list_events(minor)?))
}

/// Attach an event to a geofence.
#[utoipa::path(
    post,
    path = "/api/geofences/{minor}/events",
    tag = "events",
    operation_id = "addEvent",
    summary = "Add an event",
    request_body = NewEvent,
    params(("minor" = u16, Path, description = "Geofence minor")),
    responses(
        (status = 200, description = "Event added or discarded", body = AddEventResponse),
        (status = 400, description = "Trigger delay out of range", body = super::error::ErrorResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown geofence", body = super::error::ErrorResponse)
    )
)]
pub async fn add_event(
    State(state): State<SharedState>,
    Path(minor): Path<Minor>,
    credential: Credential,
    Json(event): Json<NewEvent>,
) -> ApiResult<Json<AddEventResponse>> {
    credential.require_admin(state.engine())?;
    let event_id = state.engine().add_event(minor, event).await?;
    Ok(Json(AddEventResponse { event_id }))
}

/// Get an event.
#[utoipa::path(
    get,
    path = "/api/geofences/{minor}/events/{event_id}",
    tag = "events",
    operation_id = "getEvent",
    summary = "Get an event",
    params(
        ("minor" = u16, Path, description = "Geofence minor"),
        ("event_id" = u32, Path, description = "Event identifier")
    ),
    responses(
        (status = 200, description = "The event", body = Event),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown event", body = super::error::ErrorResponse)
    )
)]
pub async fn get_event(
    State(state): State<SharedState>,
    Path((minor, event_id)): Path<(Minor, EventId)>,
    credential: Credential,
) -> ApiResult<Json<Event>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().get_event(minor, event_id)?))
}

/// Detach an event.
#[utoipa::path(
    delete,
    path = "/api/geofences/{minor}/events/{event_id}",
    tag = "events",
    operation_id = "removeEvent",
    summary = "Remove an event",
    description = "Detaches the event. A counter it used is kept.",
    params(
        ("minor" = u16, Path, description = "Geofence minor"),
        ("event_id" = u32, Path, description = "Event identifier")
    ),
    responses(
        (status = 204, description = "Event removed"),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown event", body = super::error::ErrorResponse)
    )
)]
pub async fn remove_event(
    State(state): State<SharedState>,
    Path((minor, event_id)): Path<(Minor, EventId)>,
    credential: Credential,
) -> ApiResult<StatusCode> {
    credential.require_admin(state.engine())?;
    state.engine().remove_event(minor, event_id)?;
    Ok(StatusCode::NO_CONTENT)
}
