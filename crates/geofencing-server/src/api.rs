//! HTTP API routes and handlers.
//!
//! Endpoints are organized by domain:
//! - `health` / `admin` - Service health and administrator secret check
//! - `devices` - Device registration and beacon reports
//! - `geofences` / `beacons` / `events` - Registry administration
//! - `counters` - Counter administration
//! - `mail` - Opt-in verification and unsubscribe links
//! - `auth` - `Authorization` header credential
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod admin;
pub mod auth;
pub mod beacons;
pub mod counters;
pub mod devices;
pub mod error;
pub mod events;
pub mod geofences;
pub mod health;
pub mod mail;
pub mod openapi;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                      - Health check
/// /verification/{address}      - Mail opt-in confirmation link
/// /unsubscribe/{address}       - Mail opt-out link
/// /api
/// ├── /admin/check             - Administrator secret check
/// ├── /devices                 - Registration, beacon reports, push tokens
/// ├── /beacons/describe        - Location labels for beacons
/// ├── /geofences               - Geofences with their beacons, events, counter
/// ├── /counters                - Counters
/// └── /openapi.json            - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .merge(mail::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/admin", admin::router())
                .nest("/devices", devices::router())
                .nest("/beacons", beacons::router())
                .nest("/geofences", geofences::router())
                .nest("/counters", counters::router()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
