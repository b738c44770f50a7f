//! # geofencing-core
//!
//! Core engine of the beacon geofencing service.
//!
//! Devices report the set of iBeacons they currently observe. The engine
//! diffs each report against the device's previous snapshot, maps entered
//! and left beacons to their geofences and runs the events attached to
//! those geofences: counters, administrator and device push notifications
//! and mail to confirmed recipients.
//!
//! ## Architecture
//!
//! - [`engine`] - The [`GeofenceEngine`] tying every operation together
//! - [`beacon`] - Beacon identity, beacon sets and presence diffing
//! - [`geofence`] / [`event`] / [`device`] - Registry entities
//! - [`counter`] - Named counters modified by events
//! - [`mail`] - Double opt-in for mail recipients
//! - [`dispatch`] - Push gateway and mail transport seams
//! - [`scheduler`] - Delayed re-checks of deferred triggers
//! - [`storage`] - JSON-file document store
//! - [`config`] - Configuration loading, validation and templates
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Identifiers and shared OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod beacon;
pub mod config;
pub mod counter;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod geofence;
pub mod mail;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use beacon::{diff, Beacon, BeaconChange, BeaconKey, BeaconSet};
pub use config::{
    Config, ConfigError, ConfigResult, ConfigSection, EncryptMethod, MailConfig, PushConfig,
    ServerConfig, StorageConfig, SystemConfig,
};
pub use counter::{Counter, CounterMode, CounterStore};
pub use device::Device;
#[cfg(feature = "fcm")]
pub use dispatch::FcmGateway;
#[cfg(feature = "smtp")]
pub use dispatch::SmtpMailTransport;
#[cfg(any(test, feature = "mock-dispatch"))]
pub use dispatch::{RecordingMailTransport, RecordingPushGateway};
pub use dispatch::{
    DispatchError, LogMailTransport, MailMessage, MailTransport, PushDestination, PushGateway,
    PushMessage,
};
pub use engine::GeofenceEngine;
pub use error::{ErrorKind, GeofencingError, Result};
pub use event::{Event, EventAction, EventListing, NewEvent, Trigger, MAX_DELAY_SECS};
pub use geofence::{Geofence, GeofenceRecord};
pub use mail::{is_valid_address, MailOptIn, VerificationOutcome};
pub use storage::{default_data_dir, Store, StoreError};
pub use types::{CounterId, DeviceId, Direction, EventId, HealthResponse, Major, Minor};
