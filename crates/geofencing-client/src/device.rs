//! Device side of the API.

use geofencing_core::{Beacon, BeaconSet, Device, DeviceId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::http::Http;
use crate::ClientResult;

#[derive(Serialize)]
struct RegisterRequest<'a> {
    address: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    device_id: DeviceId,
}

#[derive(Serialize)]
struct BeaconsBody<'a> {
    beacons: Vec<&'a Beacon>,
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: Option<&'a str>,
}

/// What the server made of a beacon report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BeaconReport {
    /// Whether the report differed from the previous one.
    pub changed: bool,
    /// Registered beacons that appeared.
    pub entered: Vec<Beacon>,
    /// Registered beacons that disappeared.
    pub left: Vec<Beacon>,
}

/// Client for one registered device.
///
/// Requests authenticate with the address the device registered with.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: Http,
    device_id: DeviceId,
}

impl DeviceClient {
    /// Registers a new device under `address`.
    ///
    /// # Errors
    ///
    /// Fails with a 409 [`ClientError::Api`](crate::ClientError::Api) if the
    /// address is already registered and with 400 if it is malformed.
    pub async fn register(base_url: Url, address: &str) -> ClientResult<Self> {
        let anonymous = Http::new(base_url.clone(), "")?;
        let response: RegisterResponse = anonymous
            .post("/api/devices", Some(&RegisterRequest { address }))
            .await?;
        tracing::info!(device_id = response.device_id, "Device registered");
        Self::new(base_url, response.device_id, address)
    }

    /// Creates a client for a device registered earlier.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, device_id: DeviceId, address: impl Into<String>) -> ClientResult<Self> {
        Ok(Self {
            http: Http::new(base_url, address)?,
            device_id,
        })
    }

    /// Identifier of the device.
    #[must_use]
    pub const fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Address the device registered with.
    #[must_use]
    pub fn address(&self) -> &str {
        self.http.credential()
    }

    fn path(&self, suffix: &str) -> String {
        format!("/api/devices/{}{suffix}", self.device_id)
    }

    /// Fetches the device as stored by the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn device(&self) -> ClientResult<Device> {
        self.http.get(&self.path("")).await
    }

    /// Reports every beacon the device currently observes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn report_beacons(&self, beacons: &BeaconSet) -> ClientResult<BeaconReport> {
        let body = BeaconsBody {
            beacons: beacons.iter().collect(),
        };
        self.http.put(&self.path("/beacons"), &body).await
    }

    /// Sets or clears the push token.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn update_push_token(&self, token: Option<&str>) -> ClientResult<()> {
        self.http
            .put_empty(&self.path("/token"), &TokenBody { token })
            .await
    }

    /// Returns `beacons` with the location labels stored on the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn describe_beacons(&self, beacons: &[Beacon]) -> ClientResult<Vec<Beacon>> {
        let body = BeaconsBody {
            beacons: beacons.iter().collect(),
        };
        self.http.post("/api/beacons/describe", Some(&body)).await
    }

    /// Unregisters the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn unregister(self) -> ClientResult<()> {
        self.http.delete(&self.path("")).await?;
        tracing::info!(device_id = self.device_id, "Device unregistered");
        Ok(())
    }
}
