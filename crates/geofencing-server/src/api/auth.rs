//! Request credentials.
//!
//! Callers put a bare credential in the `Authorization` header: the
//! administrator secret, or the mail address a device registered with.
//! A `Bearer ` prefix is accepted and ignored.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use geofencing_core::{Device, DeviceId, GeofenceEngine, GeofencingError};

use crate::api::error::{ApiError, ApiResult};

/// The credential of a request, if it carries one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Credential {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(parse)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(Self(credential))
    }
}

fn parse(header: &str) -> &str {
    let header = header.trim();
    header.strip_prefix("Bearer ").map_or(header, str::trim)
}

impl Credential {
    /// The raw credential, empty if absent.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or_default()
    }

    /// Returns `true` if the credential is the administrator secret.
    #[must_use]
    pub fn is_admin(&self, engine: &GeofenceEngine) -> bool {
        self.0.as_deref().is_some_and(|secret| engine.is_admin(secret))
    }

    /// Requires the administrator secret.
    ///
    /// # Errors
    ///
    /// Returns 401 otherwise.
    pub fn require_admin(&self, engine: &GeofenceEngine) -> ApiResult<()> {
        if self.is_admin(engine) {
            Ok(())
        } else {
            tracing::debug!("Rejected administrator request");
            Err(ApiError::unauthorized())
        }
    }

    /// Requires the registered address of `device_id`.
    ///
    /// # Errors
    ///
    /// Returns 404 for an unknown device and 401 for a wrong address.
    pub fn require_device(&self, engine: &GeofenceEngine, device_id: DeviceId) -> ApiResult<Device> {
        let Some(address) = self.0.as_deref() else {
            return Err(ApiError::unauthorized());
        };
        Ok(engine.authenticate_device(device_id, address)?)
    }

    /// Requires the administrator secret or the registered address of
    /// `device_id`.
    ///
    /// # Errors
    ///
    /// Returns 404 for an unknown device and 401 for a wrong credential.
    pub fn require_device_or_admin(
        &self,
        engine: &GeofenceEngine,
        device_id: DeviceId,
    ) -> ApiResult<()> {
        if self.is_admin(engine) {
            return Ok(());
        }
        self.require_device(engine, device_id).map(|_| ())
    }

    /// Requires the administrator secret or the address of any registered
    /// device.
    ///
    /// # Errors
    ///
    /// Returns 401 otherwise.
    pub fn require_any_device_or_admin(&self, engine: &GeofenceEngine) -> ApiResult<()> {
        if self.is_admin(engine) {
            return Ok(());
        }
        match engine.get_device_by_address(self.as_str()) {
            Ok(_) => Ok(()),
            Err(GeofencingError::DeviceAddressNotFound(_)) => Err(ApiError::unauthorized()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Credential {
        let mut builder = Request::builder().uri("/");
        if let Some(header) = header {
            builder = builder.header(AUTHORIZATION, header);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Credential::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_extracts_bare_and_bearer_credentials() {
        assert_eq!(extract(Some("s3cret")).await, Credential(Some("s3cret".into())));
        assert_eq!(
            extract(Some("Bearer a@example.org")).await,
            Credential(Some("a@example.org".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_or_blank_credential() {
        assert_eq!(extract(None).await, Credential(None));
        assert_eq!(extract(Some("   ")).await, Credential(None));
        assert_eq!(Credential(None).as_str(), "");
    }
}
