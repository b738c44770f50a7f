//! Administrator side of the API.

use geofencing_core::{
    Beacon, Counter, CounterId, Device, DeviceId, Event, EventId, EventListing, Geofence,
    GeofenceRecord, Major, Minor, NewEvent,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::Http;
use crate::ClientResult;

#[derive(Deserialize)]
struct AdminCheck {
    is_admin: bool,
}

#[derive(Serialize)]
struct CreateGeofence<'a> {
    description: &'a str,
}

#[derive(Deserialize)]
struct Created {
    minor: Minor,
}

#[derive(Deserialize)]
struct Added {
    added: bool,
}

#[derive(Deserialize)]
struct EventCreated {
    event_id: Option<EventId>,
}

#[derive(Deserialize)]
struct CounterCreated {
    counter_id: CounterId,
}

#[derive(Deserialize)]
struct CounterValue {
    value: u32,
}

/// Client authenticated with the administrator secret.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Http,
}

impl AdminClient {
    /// Creates a client sending `secret` with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, secret: impl Into<String>) -> ClientResult<Self> {
        Ok(Self {
            http: Http::new(base_url, secret)?,
        })
    }

    /// Asks the server whether the secret is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn is_admin(&self) -> ClientResult<bool> {
        let check: AdminCheck = self.http.post::<(), _>("/api/admin/check", None).await?;
        Ok(check.is_admin)
    }

    // ------------------------------------------------------------------
    // Geofences
    // ------------------------------------------------------------------

    /// Lists all geofences.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_geofences(&self) -> ClientResult<Vec<GeofenceRecord>> {
        self.http.get("/api/geofences").await
    }

    /// Creates a geofence and returns its minor.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_geofence(&self, description: &str) -> ClientResult<Minor> {
        let created: Created = self
            .http
            .post("/api/geofences", Some(&CreateGeofence { description }))
            .await?;
        Ok(created.minor)
    }

    /// Fetches a geofence with its beacons and events.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn geofence(&self, minor: Minor) -> ClientResult<Geofence> {
        self.http.get(&format!("/api/geofences/{minor}")).await
    }

    /// Deletes an empty geofence.
    ///
    /// # Errors
    ///
    /// Fails with 409 while the geofence still owns beacons or events.
    pub async fn remove_geofence(&self, minor: Minor) -> ClientResult<()> {
        self.http.delete(&format!("/api/geofences/{minor}")).await
    }

    /// Number of devices inside a geofence, read from its geofence counter.
    ///
    /// # Errors
    ///
    /// Fails with 404 if the geofence has no geofence counter event.
    pub async fn geofence_counter(&self, minor: Minor) -> ClientResult<u32> {
        let counter: CounterValue = self
            .http
            .get(&format!("/api/geofences/{minor}/counter"))
            .await?;
        Ok(counter.value)
    }

    // ------------------------------------------------------------------
    // Beacons
    // ------------------------------------------------------------------

    /// Lists the beacons of a geofence.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_beacons(&self, minor: Minor) -> ClientResult<Vec<Beacon>> {
        self.http
            .get(&format!("/api/geofences/{minor}/beacons"))
            .await
    }

    /// Asks the server for the next unused beacon of a geofence.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn generate_beacon(&self, minor: Minor) -> ClientResult<Beacon> {
        self.http
            .get(&format!("/api/geofences/{minor}/beacons/generate"))
            .await
    }

    /// Registers a beacon. Returns `false` if the server refused it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn add_beacon(&self, beacon: &Beacon) -> ClientResult<bool> {
        let added: Added = self
            .http
            .post(&format!("/api/geofences/{}/beacons", beacon.minor), Some(beacon))
            .await?;
        Ok(added.added)
    }

    /// Fetches one beacon.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn beacon(&self, minor: Minor, major: Major) -> ClientResult<Beacon> {
        self.http
            .get(&format!("/api/geofences/{minor}/beacons/{major}"))
            .await
    }

    /// Unregisters a beacon.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn remove_beacon(&self, minor: Minor, major: Major) -> ClientResult<()> {
        self.http
            .delete(&format!("/api/geofences/{minor}/beacons/{major}"))
            .await
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Lists the events of a geofence.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_events(&self, minor: Minor) -> ClientResult<Vec<EventListing>> {
        self.http
            .get(&format!("/api/geofences/{minor}/events"))
            .await
    }

    /// Adds an event. `None` means the server discarded it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn add_event(&self, minor: Minor, event: &NewEvent) -> ClientResult<Option<EventId>> {
        let created: EventCreated = self
            .http
            .post(&format!("/api/geofences/{minor}/events"), Some(event))
            .await?;
        Ok(created.event_id)
    }

    /// Fetches one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn event(&self, minor: Minor, event_id: EventId) -> ClientResult<Event> {
        self.http
            .get(&format!("/api/geofences/{minor}/events/{event_id}"))
            .await
    }

    /// Removes an event.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn remove_event(&self, minor: Minor, event_id: EventId) -> ClientResult<()> {
        self.http
            .delete(&format!("/api/geofences/{minor}/events/{event_id}"))
            .await
    }

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    /// Lists all counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_counters(&self) -> ClientResult<Vec<Counter>> {
        self.http.get("/api/counters").await
    }

    /// Creates a counter at zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn create_counter(&self) -> ClientResult<CounterId> {
        let created: CounterCreated = self.http.post::<(), _>("/api/counters", None).await?;
        Ok(created.counter_id)
    }

    /// Reads a counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn counter_value(&self, counter_id: CounterId) -> ClientResult<u32> {
        let counter: CounterValue = self
            .http
            .get(&format!("/api/counters/{counter_id}"))
            .await?;
        Ok(counter.value)
    }

    /// Deletes a counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn remove_counter(&self, counter_id: CounterId) -> ClientResult<()> {
        self.http
            .delete(&format!("/api/counters/{counter_id}"))
            .await
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Lists all registered devices.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_devices(&self) -> ClientResult<Vec<Device>> {
        self.http.get("/api/devices").await
    }

    /// Unregisters a device.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn remove_device(&self, device_id: DeviceId) -> ClientResult<()> {
        self.http
            .delete(&format!("/api/devices/{device_id}"))
            .await
    }
}
