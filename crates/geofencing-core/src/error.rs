//! Unified error types for the geofencing core library.
//!
//! [`GeofencingError`] covers every failure an engine operation can report.
//! Each module keeps its own narrow error type ([`ConfigError`],
//! [`StoreError`], [`DispatchError`], [`SchedulerError`]) and converts into
//! the unified type at the engine boundary.
//!
//! Every variant belongs to one [`ErrorKind`], which is what the service
//! layer maps to a response status.
//!
//! # Example
//!
//! ```rust
//! use geofencing_core::error::{ErrorKind, GeofencingError, Result};
//!
//! fn lookup(minor: u16) -> Result<()> {
//!     Err(GeofencingError::GeofenceNotFound(minor))
//! }
//!
//! let err = lookup(3).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert_eq!(err.http_status_code(), 404);
//! ```
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`StoreError`]: crate::storage::StoreError
//! [`DispatchError`]: crate::dispatch::DispatchError
//! [`SchedulerError`]: crate::scheduler::SchedulerError

use std::fmt;

use thiserror::Error;

use crate::types::{CounterId, DeviceId, EventId, Major, Minor};

/// Failure class of a [`GeofencingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A looked-up entity does not exist.
    NotFound,
    /// The entity to create already exists.
    AlreadyExisting,
    /// Credentials are missing or wrong.
    Unauthorized,
    /// A deployment parameter is missing or invalid.
    Configuration,
    /// The operation is not allowed in the current state.
    PreconditionFailed,
    /// The request itself is malformed.
    InvalidInput,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExisting => "already existing",
            Self::Unauthorized => "unauthorized",
            Self::Configuration => "configuration",
            Self::PreconditionFailed => "precondition failed",
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The unified error type for all geofencing operations.
#[derive(Debug, Error)]
pub enum GeofencingError {
    // =========================================================================
    // LOOKUP ERRORS
    // =========================================================================
    /// No geofence with this minor exists.
    #[error("Geofence {0} not found")]
    GeofenceNotFound(Minor),

    /// No beacon with this major exists in the geofence.
    #[error("Beacon {major} not found in geofence {minor}")]
    BeaconNotFound {
        /// Geofence minor.
        minor: Minor,
        /// Beacon major.
        major: Major,
    },

    /// No event with this identifier exists in the geofence.
    #[error("Event {event_id} not found in geofence {minor}")]
    EventNotFound {
        /// Geofence minor.
        minor: Minor,
        /// Event identifier.
        event_id: EventId,
    },

    /// No device with this identifier is registered.
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    /// No device is registered under this address.
    #[error("No device registered for '{0}'")]
    DeviceAddressNotFound(String),

    /// No counter with this identifier exists.
    #[error("Counter {0} not found")]
    CounterNotFound(CounterId),

    /// The mail address is neither pending nor confirmed.
    #[error("Mail address '{0}' not found")]
    MailAddressNotFound(String),

    /// The geofence has no geofence counter event.
    #[error("Geofence {0} has no geofence counter")]
    GeofenceCounterNotFound(Minor),

    /// A stored document is missing.
    #[error("No document '{key}' in collection '{collection}'")]
    DocumentNotFound {
        /// Collection name.
        collection: &'static str,
        /// Rendered key.
        key: String,
    },

    // =========================================================================
    // CONFLICT ERRORS
    // =========================================================================
    /// A device is already registered under this address.
    #[error("A device is already registered for '{0}'")]
    DeviceAlreadyRegistered(String),

    /// A stored document with this key already exists.
    #[error("Document '{key}' already exists in collection '{collection}'")]
    AlreadyExisting {
        /// Collection name.
        collection: &'static str,
        /// Rendered key.
        key: String,
    },

    /// The geofence still owns beacons or events.
    #[error(
        "Geofence {minor} still owns {beacons} beacon(s) and {events} event(s). Remove them first."
    )]
    GeofenceNotEmpty {
        /// Geofence minor.
        minor: Minor,
        /// Remaining beacons.
        beacons: usize,
        /// Remaining events.
        events: usize,
    },

    /// A verification for this address is already waiting for confirmation.
    #[error("A verification request for '{0}' is already pending")]
    VerificationPending(String),

    /// Every identifier of a sequence has been handed out.
    #[error("No free identifier left for {0}")]
    IdentifierSpaceExhausted(&'static str),

    // =========================================================================
    // AUTHORIZATION ERRORS
    // =========================================================================
    /// Credentials are missing or do not match.
    #[error("Unauthorized")]
    Unauthorized,

    // =========================================================================
    // INPUT ERRORS
    // =========================================================================
    /// The string is not a syntactically valid mail address.
    #[error("Invalid mail address: '{0}'")]
    InvalidMailAddress(String),

    /// The trigger delay exceeds the supported maximum.
    #[error("Trigger delay of {delay_secs}s exceeds the maximum of {max_secs}s")]
    DelayOutOfRange {
        /// Requested delay in seconds.
        delay_secs: u64,
        /// Largest accepted delay in seconds.
        max_secs: u64,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A deployment parameter is missing.
    #[error("Configuration value '{0}' is not set. Fill it in and restart the service.")]
    ConfigValueNotSet(String),

    /// The configuration could not be loaded.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// A deployment parameter has an unusable value.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // DISPATCH ERRORS
    // =========================================================================
    /// The push gateway rejected or did not receive a notification.
    #[error("Push delivery failed: {0}")]
    PushDeliveryFailed(String),

    /// The mail transport rejected or did not receive a message.
    #[error("Mail delivery failed: {0}")]
    MailDeliveryFailed(String),

    // =========================================================================
    // RUNTIME, PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// The delayed check scheduler is not usable.
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for geofencing operations.
pub type Result<T> = std::result::Result<T, GeofencingError>;

impl GeofencingError {
    /// Returns the failure class of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::GeofenceNotFound(_)
            | Self::BeaconNotFound { .. }
            | Self::EventNotFound { .. }
            | Self::DeviceNotFound(_)
            | Self::DeviceAddressNotFound(_)
            | Self::CounterNotFound(_)
            | Self::MailAddressNotFound(_)
            | Self::GeofenceCounterNotFound(_)
            | Self::DocumentNotFound { .. } => ErrorKind::NotFound,

            Self::DeviceAlreadyRegistered(_) | Self::AlreadyExisting { .. } => {
                ErrorKind::AlreadyExisting
            }

            Self::GeofenceNotEmpty { .. } | Self::VerificationPending(_) => {
                ErrorKind::PreconditionFailed
            }

            Self::Unauthorized => ErrorKind::Unauthorized,

            Self::InvalidMailAddress(_) | Self::DelayOutOfRange { .. } => ErrorKind::InvalidInput,

            Self::ConfigValueNotSet(_)
            | Self::ConfigParseError(_)
            | Self::ConfigValidationError(_) => ErrorKind::Configuration,

            Self::IdentifierSpaceExhausted(_)
            | Self::PushDeliveryFailed(_)
            | Self::MailDeliveryFailed(_)
            | Self::SchedulerError(_)
            | Self::PersistenceError(_)
            | Self::IoError(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if a looked-up entity does not exist.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound)
    }

    /// Returns `true` if the entity to create already exists.
    #[inline]
    #[must_use]
    pub const fn is_already_existing(&self) -> bool {
        matches!(self.kind(), ErrorKind::AlreadyExisting)
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration)
    }

    /// Returns `true` if an outbound notification or mail failed.
    #[inline]
    #[must_use]
    pub const fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            Self::PushDeliveryFailed(_) | Self::MailDeliveryFailed(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExisting | ErrorKind::PreconditionFailed => 409,
            ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::GeofenceNotFound(_) => "GEOFENCE_NOT_FOUND",
            Self::BeaconNotFound { .. } => "BEACON_NOT_FOUND",
            Self::EventNotFound { .. } => "EVENT_NOT_FOUND",
            Self::DeviceNotFound(_) | Self::DeviceAddressNotFound(_) => "DEVICE_NOT_FOUND",
            Self::CounterNotFound(_) => "COUNTER_NOT_FOUND",
            Self::MailAddressNotFound(_) => "MAIL_ADDRESS_NOT_FOUND",
            Self::GeofenceCounterNotFound(_) => "GEOFENCE_COUNTER_NOT_FOUND",
            Self::DocumentNotFound { .. } => "NOT_FOUND",
            Self::DeviceAlreadyRegistered(_) => "DEVICE_ALREADY_REGISTERED",
            Self::AlreadyExisting { .. } => "ALREADY_EXISTING",
            Self::GeofenceNotEmpty { .. } => "GEOFENCE_NOT_EMPTY",
            Self::VerificationPending(_) => "VERIFICATION_PENDING",
            Self::IdentifierSpaceExhausted(_) => "IDENTIFIER_SPACE_EXHAUSTED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidMailAddress(_) => "INVALID_MAIL_ADDRESS",
            Self::DelayOutOfRange { .. } => "DELAY_OUT_OF_RANGE",
            Self::ConfigValueNotSet(_) => "CONFIG_VALUE_NOT_SET",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PushDeliveryFailed(_) => "PUSH_DELIVERY_FAILED",
            Self::MailDeliveryFailed(_) => "MAIL_DELIVERY_FAILED",
            Self::SchedulerError(_) => "SCHEDULER_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for GeofencingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::ValueNotSet { key } => Self::ConfigValueNotSet(key),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::NoConfigDir => {
                Self::ConfigValidationError("Cannot determine configuration directory".into())
            }
        }
    }
}

impl From<crate::storage::StoreError> for GeofencingError {
    fn from(err: crate::storage::StoreError) -> Self {
        use crate::storage::StoreError;
        match err {
            StoreError::NotFound { collection, key } => Self::DocumentNotFound { collection, key },
            StoreError::AlreadyExists { collection, key } => {
                Self::AlreadyExisting { collection, key }
            }
            StoreError::Io { path, source } => {
                Self::PersistenceError(format!("Failed to access {}: {source}", path.display()))
            }
            StoreError::Serialization { path, source } => {
                Self::PersistenceError(format!("Invalid data in {}: {source}", path.display()))
            }
            StoreError::Poisoned(collection) => {
                Self::PersistenceError(format!("Collection '{collection}' is unavailable"))
            }
            StoreError::NoDataDir => {
                Self::PersistenceError("Cannot determine data directory".into())
            }
        }
    }
}

impl From<crate::dispatch::DispatchError> for GeofencingError {
    fn from(err: crate::dispatch::DispatchError) -> Self {
        use crate::dispatch::DispatchError;
        match err {
            DispatchError::Mail(message) => Self::MailDeliveryFailed(message),
            DispatchError::NotConfigured { key } => Self::ConfigValueNotSet(key),
            other @ (DispatchError::Rejected { .. } | DispatchError::Transport(_)) => {
                Self::PushDeliveryFailed(other.to_string())
            }
        }
    }
}

impl From<crate::scheduler::SchedulerError> for GeofencingError {
    fn from(err: crate::scheduler::SchedulerError) -> Self {
        Self::SchedulerError(err.to_string())
    }
}

/// Maps a store lookup failure to a domain-specific not-found error.
pub(crate) trait OrNotFound<T> {
    /// Replaces [`StoreError::NotFound`](crate::storage::StoreError::NotFound)
    /// with `not_found()`, converting every other error as usual.
    fn or_not_found(self, not_found: impl FnOnce() -> GeofencingError) -> Result<T>;
}

impl<T> OrNotFound<T> for std::result::Result<T, crate::storage::StoreError> {
    fn or_not_found(self, not_found: impl FnOnce() -> GeofencingError) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(crate::storage::StoreError::NotFound { .. }) => Err(not_found()),
            Err(other) => Err(other.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
