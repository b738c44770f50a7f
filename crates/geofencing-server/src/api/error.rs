//! API error types and response handling.
//!
//! Every handler returns [`ApiResult`]; engine errors convert into
//! [`ApiError`] by their [`ErrorKind`] and render as a JSON
//! [`ErrorResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geofencing_core::{ErrorKind, GeofencingError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    #[error("Bad Request: {message}")]
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 401 Unauthorized - Missing or wrong credential.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    #[error("Not Found: {message}")]
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Resource exists already or its state forbids the
    /// operation.
    #[error("Conflict: {message}")]
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// What stands in the way, if known.
        details: Option<serde_json::Value>,
    },

    /// 500 Internal Server Error - Unexpected server-side error or missing
    /// configuration.
    #[error("Internal Error: {message}")]
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// 401 for a missing or wrong credential.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::Unauthorized {
            message: "Missing or invalid credential".to_string(),
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "GEOFENCE_NOT_EMPTY",
    "message": "Geofence 3 still owns 2 beacon(s) and 1 event(s). Remove them first.",
    "details": { "beacons": 2, "events": 1 }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code.
    #[schema(example = "GEOFENCE_NOT_FOUND")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Geofence 3 not found")]
    pub message: String,

    /// Optional additional details.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Unauthorized { message } => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "UNAUTHORIZED".to_string(),
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict {
                error_code,
                message,
                details,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details,
                },
            ),

            Self::InternalError { error_code, message } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: None,
                    },
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<GeofencingError> for ApiError {
    fn from(err: GeofencingError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match err.kind() {
            ErrorKind::InvalidInput => Self::BadRequest { error_code, message },
            ErrorKind::Unauthorized => Self::Unauthorized { message },
            ErrorKind::NotFound => Self::NotFound { error_code, message },
            ErrorKind::AlreadyExisting | ErrorKind::PreconditionFailed => {
                let details = match &err {
                    GeofencingError::GeofenceNotEmpty {
                        beacons, events, ..
                    } => Some(serde_json::json!({
                        "beacons": beacons,
                        "events": events
                    })),
                    _ => None,
                };
                Self::Conflict {
                    error_code,
                    message,
                    details,
                }
            }
            ErrorKind::Configuration | ErrorKind::Internal => {
                Self::InternalError { error_code, message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert!(matches!(
            ApiError::from(GeofencingError::GeofenceNotFound(3)),
            ApiError::NotFound { .. }
        ));
        assert!(matches!(
            ApiError::from(GeofencingError::Unauthorized),
            ApiError::Unauthorized { .. }
        ));
        assert!(matches!(
            ApiError::from(GeofencingError::DeviceAlreadyRegistered("a@b.org".into())),
            ApiError::Conflict { .. }
        ));
        assert!(matches!(
            ApiError::from(GeofencingError::InvalidMailAddress("nope".into())),
            ApiError::BadRequest { .. }
        ));
        assert!(matches!(
            ApiError::from(GeofencingError::ConfigValueNotSet("push.admin_server_key".into())),
            ApiError::InternalError { .. }
        ));
    }

    #[test]
    fn test_not_empty_conflict_carries_counts() {
        let err = ApiError::from(GeofencingError::GeofenceNotEmpty {
            minor: 3,
            beacons: 2,
            events: 0,
        });
        let ApiError::Conflict {
            error_code,
            details,
            ..
        } = err
        else {
            panic!("expected conflict");
        };
        assert_eq!(error_code, "GEOFENCE_NOT_EMPTY");
        assert_eq!(details, Some(serde_json::json!({ "beacons": 2, "events": 0 })));
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::unauthorized().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::from(GeofencingError::VerificationPending("a@b.org".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "COUNTER_NOT_FOUND".to_string(),
            message: "Counter 4 not found".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\":\"COUNTER_NOT_FOUND\""));
    }
}
