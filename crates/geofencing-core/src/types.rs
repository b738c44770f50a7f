//! Shared identifier types, the presence direction and OpenAPI schemas.
//!
//! Beacon identifiers follow the iBeacon layout: the system UUID names the
//! installation, the minor names a geofence and the major names a beacon
//! within that geofence.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Geofence identifier, shared by every beacon of that geofence.
pub type Minor = u16;

/// Beacon identifier, unique within one geofence.
pub type Major = u16;

/// Identifier of a registered device.
pub type DeviceId = u32;

/// Identifier of an event, sequential per geofence.
pub type EventId = u32;

/// Identifier of a counter.
pub type CounterId = u32;

/// Direction of a presence change relative to a geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Direction {
    /// The device started observing a beacon of the geofence.
    Enter,
    /// The device stopped observing a beacon of the geofence.
    Leave,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Leave => f.write_str("leave"),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Beacon namespace of the installation.
    #[schema(example = "f7826da6-4fa2-4e98-8024-bc5b71e0893e")]
    pub system_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_serializes_as_variant_name() {
        assert_eq!(serde_json::to_string(&Direction::Enter).unwrap(), "\"Enter\"");
        let parsed: Direction = serde_json::from_str("\"Leave\"").unwrap();
        assert_eq!(parsed, Direction::Leave);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Enter.to_string(), "enter");
        assert_eq!(Direction::Leave.to_string(), "leave");
    }
}
