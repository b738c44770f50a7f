//! OpenAPI specification for the geofencing API.
//!
//! Served at `/api/openapi.json` and written to the workspace root by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use geofencing_core::{
    Beacon, Counter, CounterMode, Device, Direction, Event, EventAction, EventListing, Geofence,
    GeofenceRecord, HealthResponse, NewEvent, Trigger,
};
use utoipa::OpenApi;

use super::admin::AdminCheckResponse;
use super::beacons::{AddBeaconResponse, DescribeBeaconsRequest};
use super::counters::CreateCounterResponse;
use super::devices::{
    BeaconChangeResponse, RegisterDeviceRequest, RegisterDeviceResponse, UpdateBeaconsRequest,
    UpdateTokenRequest,
};
use super::error::ErrorResponse;
use super::events::AddEventResponse;
use super::geofences::{CounterValueResponse, CreateGeofenceRequest, CreateGeofenceResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Geofencing API",
        version = "0.1.0",
        description = r#"
# Geofencing API

Beacon based geofencing. Every beacon of an installation shares the system
UUID; the **minor** names the geofence it belongs to and the **major** the
beacon within that geofence.

## Devices

A device registers with a mail address and uses that address as its
`Authorization` header afterwards. It reports the complete set of beacons
it currently sees; the service works out which geofences were entered or
left and runs their events.

## Administration

Geofences, beacons, events and counters are managed with the administrator
secret in the `Authorization` header.

## Events

- **ModifyCounter**: increment, decrement or reset a counter
- **GeofenceCounter**: track how many devices are inside the geofence
- **SendMail**: mail a recipient that confirmed the opt-in
- **AdminNotification** / **DeviceNotification**: push notifications

Events may be delayed; a delayed event only fires if the device is still
inside (or still outside) the geofence when the delay has passed.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local geofencing server")
    ),
    tags(
        (name = "system", description = "Health checks and credential checks"),
        (name = "devices", description = "Device registration and beacon reports"),
        (name = "geofences", description = "Geofence administration"),
        (name = "beacons", description = "Beacon administration and descriptions"),
        (name = "events", description = "Events attached to geofences"),
        (name = "counters", description = "Counters modified by events"),
        (name = "mail", description = "Mail opt-in links")
    ),
    paths(
        super::health::health_check,
        super::admin::check_admin,
        super::devices::list_devices,
        super::devices::register_device,
        super::devices::get_device,
        super::devices::remove_device,
        super::devices::update_beacons,
        super::devices::update_token,
        super::beacons::describe_beacons,
        super::geofences::list_geofences,
        super::geofences::create_geofence,
        super::geofences::get_geofence,
        super::geofences::remove_geofence,
        super::geofences::get_geofence_counter,
        super::beacons::list_beacons,
        super::beacons::add_beacon,
        super::beacons::generate_beacon,
        super::beacons::get_beacon,
        super::beacons::remove_beacon,
        super::events::list_events,
        super::events::add_event,
        super::events::get_event,
        super::events::remove_event,
        super::counters::list_counters,
        super::counters::create_counter,
        super::counters::get_counter,
        super::counters::remove_counter,
        super::mail::verify_address,
        super::mail::unsubscribe_address,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            AdminCheckResponse,
            // Devices
            Device,
            RegisterDeviceRequest,
            RegisterDeviceResponse,
            UpdateBeaconsRequest,
            BeaconChangeResponse,
            UpdateTokenRequest,
            // Geofences and beacons
            Beacon,
            GeofenceRecord,
            Geofence,
            CreateGeofenceRequest,
            CreateGeofenceResponse,
            AddBeaconResponse,
            DescribeBeaconsRequest,
            // Events
            Direction,
            Trigger,
            EventAction,
            Event,
            NewEvent,
            EventListing,
            AddEventResponse,
            // Counters
            Counter,
            CounterMode,
            CounterValueResponse,
            CreateCounterResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Geofencing API");
        assert!(spec.paths.paths.contains_key("/api/devices/{device_id}/beacons"));
        assert!(spec.paths.paths.contains_key("/verification/{address}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"Geofencing API\""));
        assert!(json.contains("\"EventAction\""));
    }
}
