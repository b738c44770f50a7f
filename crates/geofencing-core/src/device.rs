//! Registered devices and their current beacon snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::beacon::{diff, Beacon, BeaconChange, BeaconSet};
use crate::storage::Document;
use crate::types::{DeviceId, Minor};

/// A device reporting beacon observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Device {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Registered mail address, also the device's bearer identity.
    pub address: String,
    /// Last time the beacon snapshot changed.
    pub last_updated: DateTime<Utc>,
    /// Push notification token, if the device registered one.
    #[serde(default)]
    pub push_token: Option<String>,
    /// Beacons currently observed.
    #[serde(default)]
    #[schema(value_type = Vec<Beacon>)]
    pub beacons: BeaconSet,
}

impl Device {
    /// Creates a device observing nothing.
    #[must_use]
    pub fn new(device_id: DeviceId, address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            device_id,
            address: address.into(),
            last_updated: now,
            push_token: None,
            beacons: BeaconSet::new(),
        }
    }

    /// Replaces the snapshot with `reported` and returns the change, or
    /// `None` (leaving the device untouched) if nothing changed.
    pub fn update_beacons(
        &mut self,
        reported: BeaconSet,
        now: DateTime<Utc>,
    ) -> Option<BeaconChange> {
        let change = diff(&self.beacons, &reported)?;
        self.beacons = reported;
        self.last_updated = now;
        Some(change)
    }

    /// Returns `true` if the device currently observes a beacon of the
    /// geofence.
    #[must_use]
    pub fn is_in_geofence(&self, minor: Minor) -> bool {
        self.beacons.contains_minor(minor)
    }
}

impl Document for Device {
    type Key = DeviceId;
    const COLLECTION: &'static str = "devices";

    fn key(&self) -> DeviceId {
        self.device_id
    }
}
