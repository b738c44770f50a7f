//! Counter administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use geofencing_core::{Counter, CounterId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::auth::Credential;
use crate::api::error::ApiResult;
use crate::api::geofences::CounterValueResponse;
use crate::state::SharedState;

/// Creates the counters router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_counters).post(create_counter))
        .route("/{counter_id}", get(get_counter).delete(remove_counter))
}

/// Response after creating a counter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "counter_id": 7 }))]
pub struct CreateCounterResponse {
    /// Identifier of the new counter.
    pub counter_id: CounterId,
}

/// List all counters.
#[utoipa::path(
    get,
    path = "/api/counters",
    tag = "counters",
    operation_id = "listCounters",
    summary = "List counters",
    responses(
        (status = 200, description = "All counters", body = Vec<Counter>),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse)
    )
)]
pub async fn list_counters(
    State(state): State<SharedState>,
    credential: Credential,
) -> ApiResult<Json<Vec<Counter>>> {
    credential.require_admin(state.engine())?;
    Ok(Json(state.engine().list_counters()?))
}

/// Create a counter starting at zero.
#[utoipa::path(
    post,
    path = "/api/counters",
    tag = "counters",
    operation_id = "createCounter",
    summary = "Create a counter",
    description = "Creates a counter that several counter events can share.",
    responses(
        (status = 201, description = "Counter created", body = CreateCounterResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse)
    )
)]
pub async fn create_counter(
    State(state): State<SharedState>,
    credential: Credential,
) -> ApiResult<(StatusCode, Json<CreateCounterResponse>)> {
    credential.require_admin(state.engine())?;
    let counter_id = state.engine().create_counter()?;
    Ok((StatusCode::CREATED, Json(CreateCounterResponse { counter_id })))
}

/// Get the value of a counter.
#[utoipa::path(
    get,
    path = "/api/counters/{counter_id}",
    tag = "counters",
    operation_id = "getCounter",
    summary = "Get a counter value",
    params(("counter_id" = u32, Path, description = "Counter identifier")),
    responses(
        (status = 200, description = "Counter value", body = CounterValueResponse),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown counter", body = super::error::ErrorResponse)
    )
)]
pub async fn get_counter(
    State(state): State<SharedState>,
    Path(counter_id): Path<CounterId>,
    credential: Credential,
) -> ApiResult<Json<CounterValueResponse>> {
    credential.require_admin(state.engine())?;
    let value = state.engine().counter_value(counter_id)?;
    Ok(Json(CounterValueResponse { value }))
}

/// Delete a counter.
#[utoipa::path(
    delete,
    path = "/api/counters/{counter_id}",
    tag = "counters",
    operation_id = "removeCounter",
    summary = "Delete a counter",
    description = "Deletes the counter. Events still bound to it log a failure when they fire.",
    params(("counter_id" = u32, Path, description = "Counter identifier")),
    responses(
        (status = 204, description = "Counter deleted"),
        (status = 401, description = "Not an administrator", body = super::error::ErrorResponse),
        (status = 404, description = "Unknown counter", body = super::error::ErrorResponse)
    )
)]
pub async fn remove_counter(
    State(state): State<SharedState>,
    Path(counter_id): Path<CounterId>,
    credential: Credential,
) -> ApiResult<StatusCode> {
    credential.require_admin(state.engine())?;
    state.engine().remove_counter(counter_id)?;
    Ok(StatusCode::NO_CONTENT)
}
