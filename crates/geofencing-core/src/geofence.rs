//! Geofence records and their assembled view.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::beacon::Beacon;
use crate::event::Event;
use crate::storage::Document;
use crate::types::Minor;

/// A stored geofence. Beacons and events are stored separately and refer to
/// the geofence by minor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GeofenceRecord {
    /// Geofence identifier.
    #[schema(example = 1)]
    pub minor: Minor,
    /// Operator description.
    #[schema(example = "Office")]
    pub description: String,
}

impl Document for GeofenceRecord {
    type Key = Minor;
    const COLLECTION: &'static str = "geofences";

    fn key(&self) -> Minor {
        self.minor
    }
}

/// A geofence with its beacons and its events in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Geofence {
    /// Geofence identifier.
    pub minor: Minor,
    /// Operator description.
    pub description: String,
    /// Beacons of the geofence.
    pub beacons: Vec<Beacon>,
    /// Events, ordered by identifier.
    pub events: Vec<Event>,
}

impl Geofence {
    /// Assembles the view from its stored parts.
    #[must_use]
    pub fn assemble(record: GeofenceRecord, beacons: Vec<Beacon>, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.event_id);
        Self {
            minor: record.minor,
            description: record.description,
            beacons,
            events,
        }
    }

    /// Returns `true` if the geofence owns neither beacons nor events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty() && self.events.is_empty()
    }
}
