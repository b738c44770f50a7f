//! End-to-end tests of the HTTP API against an in-memory engine.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use geofencing_core::{
    Beacon, Config, CounterMode, Direction, EventAction, GeofenceEngine, NewEvent,
    RecordingMailTransport, RecordingPushGateway, Store, Trigger,
};
use geofencing_server::api::create_router;
use geofencing_server::api::devices::{BeaconChangeResponse, RegisterDeviceResponse};
use geofencing_server::api::events::AddEventResponse;
use geofencing_server::api::geofences::{CounterValueResponse, CreateGeofenceResponse};
use geofencing_server::state::AppState;
use serde_json::json;

const ADMIN: &str = "admin-secret";
const SYSTEM_UUID: &str = "f7826da6-4fa2-4e98-8024-bc5b71e0893e";

struct Harness {
    server: TestServer,
    mail: Arc<RecordingMailTransport>,
}

fn config() -> Config {
    let mut config = Config::default();
    config.server.admin_secret = Some(ADMIN.into());
    config.system.uuid = Some(SYSTEM_UUID.into());
    config.mail.service_url = Some("https://geo.example.org".into());
    config.mail.sender_address = Some("noreply@example.org".into());
    config.mail.confirmation_timeout_secs = Some(3600);
    config.mail.delete_timeout_secs = Some(7200);
    config
}

fn harness() -> Harness {
    let mail = Arc::new(RecordingMailTransport::new());
    let engine = Arc::new(
        GeofenceEngine::new(
            config(),
            Arc::new(Store::in_memory()),
            Arc::new(RecordingPushGateway::new()),
            mail.clone(),
        )
        .unwrap(),
    );
    engine.start().unwrap();

    let server = TestServer::new(create_router(AppState::new(engine))).unwrap();
    Harness { server, mail }
}

fn auth(request: TestRequest, credential: &str) -> TestRequest {
    request.add_header(
        header::AUTHORIZATION,
        HeaderValue::from_str(credential).unwrap(),
    )
}

async fn create_geofence(server: &TestServer, description: &str) -> u16 {
    let response = auth(server.post("/api/geofences"), ADMIN)
        .json(&json!({ "description": description }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<CreateGeofenceResponse>().minor
}

async fn add_generated_beacon(server: &TestServer, minor: u16) -> Beacon {
    let beacon: Beacon = auth(
        server.get(&format!("/api/geofences/{minor}/beacons/generate")),
        ADMIN,
    )
    .await
    .json();
    let response = auth(server.post(&format!("/api/geofences/{minor}/beacons")), ADMIN)
        .json(&beacon)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>(), json!({ "added": true }));
    beacon
}

async fn register(server: &TestServer, address: &str) -> u32 {
    let response = server
        .post("/api/devices")
        .json(&json!({ "address": address }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<RegisterDeviceResponse>().device_id
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let response = h.server.get("/health").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["system_uuid"], SYSTEM_UUID);
}

#[tokio::test]
async fn test_admin_check() {
    let h = harness();
    let yes = auth(h.server.post("/api/admin/check"), ADMIN).await;
    assert_eq!(yes.json::<serde_json::Value>(), json!({ "is_admin": true }));

    let no = h.server.post("/api/admin/check").await;
    assert_eq!(no.json::<serde_json::Value>(), json!({ "is_admin": false }));
}

#[tokio::test]
async fn test_admin_routes_require_secret() {
    let h = harness();
    let response = h.server.get("/api/geofences").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<serde_json::Value>()["error"], "UNAUTHORIZED");

    auth(h.server.get("/api/counters"), "wrong")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_geofence_lifecycle() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let beacon = add_generated_beacon(&h.server, minor).await;

    let duplicate = auth(h.server.post(&format!("/api/geofences/{minor}/beacons")), ADMIN)
        .json(&beacon)
        .await;
    assert_eq!(duplicate.json::<serde_json::Value>(), json!({ "added": false }));

    let conflict = auth(h.server.delete(&format!("/api/geofences/{minor}")), ADMIN).await;
    conflict.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = conflict.json();
    assert_eq!(body["error"], "GEOFENCE_NOT_EMPTY");
    assert_eq!(body["details"], json!({ "beacons": 1, "events": 0 }));

    auth(
        h.server
            .delete(&format!("/api/geofences/{minor}/beacons/{}", beacon.major)),
        ADMIN,
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);
    auth(h.server.delete(&format!("/api/geofences/{minor}")), ADMIN)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    auth(h.server.get(&format!("/api/geofences/{minor}")), ADMIN)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_device_registration_conflicts() {
    let h = harness();
    register(&h.server, "jane@example.org").await;

    h.server
        .post("/api/devices")
        .json(&json!({ "address": "jane@example.org" }))
        .await
        .assert_status(StatusCode::CONFLICT);
    h.server
        .post("/api/devices")
        .json(&json!({ "address": "not-an-address" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_device_routes_require_own_address() {
    let h = harness();
    let jane = register(&h.server, "jane@example.org").await;
    register(&h.server, "joe@example.org").await;

    auth(h.server.get(&format!("/api/devices/{jane}")), "jane@example.org")
        .await
        .assert_status_ok();
    auth(h.server.get(&format!("/api/devices/{jane}")), ADMIN)
        .await
        .assert_status_ok();
    auth(h.server.get(&format!("/api/devices/{jane}")), "joe@example.org")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    auth(
        h.server.put(&format!("/api/devices/{jane}/beacons")),
        ADMIN,
    )
    .json(&json!({ "beacons": [] }))
    .await
    .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_beacon_report_triggers_counter() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let beacon = add_generated_beacon(&h.server, minor).await;

    let event = NewEvent {
        description: "Count arrivals".into(),
        trigger: Trigger::immediate(Direction::Enter),
        action: EventAction::ModifyCounter {
            counter_id: None,
            mode: CounterMode::Increment,
        },
    };
    let added = auth(h.server.post(&format!("/api/geofences/{minor}/events")), ADMIN)
        .json(&event)
        .await
        .json::<AddEventResponse>();
    assert_eq!(added.event_id, Some(1));

    let stored: serde_json::Value =
        auth(h.server.get(&format!("/api/geofences/{minor}/events/1")), ADMIN)
            .await
            .json();
    let counter_id = stored["action"]["counter_id"].as_u64().unwrap();

    let address = "jane@example.org";
    let device = register(&h.server, address).await;
    let report = |beacons: Vec<Beacon>| {
        auth(h.server.put(&format!("/api/devices/{device}/beacons")), address)
            .json(&json!({ "beacons": beacons }))
    };

    let change = report(vec![beacon.clone()]).await.json::<BeaconChangeResponse>();
    assert!(change.changed);
    assert_eq!(change.entered, vec![beacon.clone()]);

    let unchanged = report(vec![beacon]).await.json::<BeaconChangeResponse>();
    assert!(!unchanged.changed);

    let value = auth(h.server.get(&format!("/api/counters/{counter_id}")), ADMIN)
        .await
        .json::<CounterValueResponse>();
    assert_eq!(value.value, 1);
}

#[tokio::test]
async fn test_describe_beacons() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let mut beacon: Beacon = auth(
        h.server.get(&format!("/api/geofences/{minor}/beacons/generate")),
        ADMIN,
    )
    .await
    .json();
    beacon.location = Some("Main door".into());
    auth(h.server.post(&format!("/api/geofences/{minor}/beacons")), ADMIN)
        .json(&beacon)
        .await
        .assert_status_ok();

    register(&h.server, "jane@example.org").await;
    let bare = Beacon::new(beacon.uuid, beacon.major, beacon.minor);
    let described: Vec<Beacon> = auth(h.server.post("/api/beacons/describe"), "jane@example.org")
        .json(&json!({ "beacons": [bare] }))
        .await
        .json();
    assert_eq!(described[0].location.as_deref(), Some("Main door"));

    h.server
        .post("/api/beacons/describe")
        .json(&json!({ "beacons": [] }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_mail_opt_in_links() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let event = NewEvent {
        description: "Mail on arrival".into(),
        trigger: Trigger::immediate(Direction::Enter),
        action: EventAction::SendMail {
            recipient: "ops@example.org".into(),
            subject: "Arrival".into(),
            message: "Someone arrived".into(),
        },
    };
    let added = auth(h.server.post(&format!("/api/geofences/{minor}/events")), ADMIN)
        .json(&event)
        .await
        .json::<AddEventResponse>();
    assert_eq!(added.event_id, Some(1));

    let sent = h.mail.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .body
        .contains("https://geo.example.org/verification/ops@example.org"));

    let confirmed = h.server.get("/verification/ops@example.org").await;
    confirmed.assert_status_ok();
    assert!(confirmed.text().contains("Address confirmed"));

    h.server
        .get("/verification/nobody@example.org")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .get("/unsubscribe/ops@example.org")
        .await
        .assert_status_ok();
    h.server
        .get("/unsubscribe/ops@example.org")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mail_links_survive_percent_in_address() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let event = NewEvent {
        description: "Mail on arrival".into(),
        trigger: Trigger::immediate(Direction::Enter),
        action: EventAction::SendMail {
            recipient: "a%41b@example.org".into(),
            subject: "Arrival".into(),
            message: "Someone arrived".into(),
        },
    };
    auth(h.server.post(&format!("/api/geofences/{minor}/events")), ADMIN)
        .json(&event)
        .await
        .assert_status_ok();

    let sent = h.mail.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .body
        .contains("https://geo.example.org/verification/a%2541b@example.org"));

    h.server
        .get("/verification/a%2541b@example.org")
        .await
        .assert_status_ok();
    h.server
        .get("/unsubscribe/a%2541b@example.org")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_oversized_trigger_delay_is_bad_request() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let event = NewEvent {
        description: "Never".into(),
        trigger: Trigger::delayed(Direction::Enter, u64::MAX),
        action: EventAction::ModifyCounter {
            counter_id: None,
            mode: CounterMode::Increment,
        },
    };
    auth(h.server.post(&format!("/api/geofences/{minor}/events")), ADMIN)
        .json(&event)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let events: serde_json::Value = auth(h.server.get(&format!("/api/geofences/{minor}/events")), ADMIN)
        .await
        .json();
    assert_eq!(events, json!([]));
}

#[tokio::test]
async fn test_notification_event_without_push_settings_is_discarded() {
    let h = harness();
    let minor = create_geofence(&h.server, "Lobby").await;
    let event = NewEvent {
        description: "Alert".into(),
        trigger: Trigger::immediate(Direction::Enter),
        action: EventAction::AdminNotification {
            title: "Arrival".into(),
            message: "Someone arrived".into(),
        },
    };
    let response = auth(h.server.post(&format!("/api/geofences/{minor}/events")), ADMIN)
        .json(&event)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>(), json!({ "event_id": null }));
}

#[tokio::test]
async fn test_openapi_is_served() {
    let h = harness();
    let spec: serde_json::Value = h.server.get("/api/openapi.json").await.json();
    assert_eq!(spec["info"]["title"], "Geofencing API");
}
