//! # geofencing-client
//!
//! HTTP client for the geofencing service.
//!
//! - [`DeviceClient`] registers a device and reports the beacons it observes
//! - [`BeaconReporter`] turns a stream of observations into fire-and-forget
//!   reports, sending only when the observed set changes
//! - [`AdminClient`] manages geofences, beacons, events and counters with the
//!   administrator secret

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

mod admin;
mod device;
mod http;
mod reporter;

use reqwest::StatusCode;
use serde::Deserialize;

pub use admin::AdminClient;
pub use device::{BeaconReport, DeviceClient};
pub use reporter::BeaconReporter;

/// Errors returned by the clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The base URL and an endpoint path do not form a URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request could not be sent or its response not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error.
    #[error("{status}: {message} ({error})")]
    Api {
        /// HTTP status.
        status: StatusCode,
        /// Machine-readable error code, e.g. `GEOFENCE_NOT_FOUND`.
        error: String,
        /// Human-readable message.
        message: String,
    },
}

impl ClientError {
    /// HTTP status of an API error.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for a 404 answer.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Returns `true` for a 401 answer.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }

    /// Returns `true` for a 409 answer.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(StatusCode::CONFLICT)
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// JSON error body of the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}
