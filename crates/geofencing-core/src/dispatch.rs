//! Outbound notification and mail collaborators.
//!
//! The engine only knows the [`PushGateway`] and [`MailTransport`] traits.
//! Production wiring uses [`FcmGateway`] (behind the `fcm` feature) and
//! [`SmtpMailTransport`] (behind the `smtp` feature). [`LogMailTransport`]
//! stands in when no mail server is configured; tests swap in the recording
//! implementations.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
#[cfg(feature = "smtp")]
use crate::config::{EncryptMethod, MailConfig};
#[cfg(feature = "fcm")]
use crate::config::PushConfig;

/// Broadcast topic every administrator device subscribes to.
pub const ADMIN_TOPIC: &str = "geofence-administrators";

/// Errors raised while dispatching a notification or mail.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The gateway answered with a non-success status.
    #[error("Gateway rejected the request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The request never reached the gateway.
    #[error("Gateway unreachable: {0}")]
    Transport(String),

    /// A configuration value needed for delivery is missing.
    #[error("Delivery not configured: '{key}' is not set")]
    NotConfigured {
        /// Dotted configuration key.
        key: String,
    },

    /// The mail transport failed.
    #[error("Mail transport failed: {0}")]
    Mail(String),
}

impl From<ConfigError> for DispatchError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValueNotSet { key } => Self::NotConfigured { key },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Recipient of a push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDestination {
    /// Every subscriber of a topic.
    Broadcast(String),
    /// A single device push token.
    Device(String),
}

impl PushDestination {
    /// The administrator broadcast topic.
    #[must_use]
    pub fn admins() -> Self {
        Self::Broadcast(ADMIN_TOPIC.to_string())
    }

    /// Gateway addressing string: the token itself, or `/topics/<topic>`.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Broadcast(topic) => format!("/topics/{topic}"),
            Self::Device(token) => token.clone(),
        }
    }
}

/// Title and body of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
}

/// A plain text mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    /// Recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub body: String,
}

/// Sends push notifications.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Delivers `message` to `destination`.
    async fn send(&self, message: &PushMessage, destination: &PushDestination)
        -> DispatchResult<()>;
}

/// Sends mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Delivers `message`.
    async fn send(&self, message: &MailMessage) -> DispatchResult<()>;
}

// =============================================================================
// FCM
// =============================================================================

/// Push gateway speaking the FCM HTTP protocol.
///
/// Broadcasts use the administrator server key, device notifications the
/// device server key.
#[cfg(feature = "fcm")]
#[derive(Debug, Clone)]
pub struct FcmGateway {
    client: reqwest::Client,
    config: PushConfig,
}

#[cfg(feature = "fcm")]
#[derive(Serialize)]
struct FcmRequest<'a> {
    notification: &'a PushMessage,
    to: String,
}

#[cfg(feature = "fcm")]
impl FcmGateway {
    /// Creates a gateway for the given push settings.
    #[must_use]
    pub fn new(config: PushConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[cfg(feature = "fcm")]
#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(
        &self,
        message: &PushMessage,
        destination: &PushDestination,
    ) -> DispatchResult<()> {
        let credentials = match destination {
            PushDestination::Broadcast(_) => self.config.require_admin(),
            PushDestination::Device(_) => self.config.require_device(),
        }
        .map_err(DispatchError::from)?;

        let request = FcmRequest {
            notification: message,
            to: destination.target(),
        };

        let response = self
            .client
            .post(&credentials.gateway_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("key={}", credentials.server_key),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(target = %destination.target(), "Push notification accepted");
        Ok(())
    }
}

// =============================================================================
// SMTP
// =============================================================================

/// Mail transport delivering through an SMTP server.
///
/// `encrypt_method = "ssl"` connects with implicit TLS, `"tls"` upgrades with
/// STARTTLS and an unset method talks plain SMTP.
#[cfg(feature = "smtp")]
pub struct SmtpMailTransport {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    sender: lettre::message::Mailbox,
}

#[cfg(feature = "smtp")]
impl std::fmt::Debug for SmtpMailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailTransport")
            .field("sender", &self.sender.to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "smtp")]
impl SmtpMailTransport {
    /// Builds a transport from the mail settings. No connection is opened
    /// until the first mail is sent.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotConfigured`] if `mail.host` or
    /// `mail.sender_address` is unset and [`DispatchError::Mail`] if the
    /// sender address or the TLS setup is invalid.
    pub fn new(config: &MailConfig) -> DispatchResult<Self> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let host = config.require_host()?;
        let address: lettre::Address = config
            .require_sender_address()?
            .parse()
            .map_err(|e| DispatchError::Mail(format!("Invalid sender address: {e}")))?;
        let name = config
            .sender_name
            .clone()
            .filter(|name| !name.trim().is_empty());
        let sender = lettre::message::Mailbox::new(name, address);

        let mut builder = match config.encrypt_method {
            Some(EncryptMethod::Ssl) => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| DispatchError::Mail(e.to_string()))?,
            Some(EncryptMethod::Tls) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| DispatchError::Mail(e.to_string()))?,
            None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        if let Some(port) = config.port {
            builder = builder.port(port);
        }
        if let Some((username, password)) = config.credentials() {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                password.to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }

    fn compose(&self, message: &MailMessage) -> DispatchResult<lettre::Message> {
        use lettre::message::header::ContentType;

        let recipient: lettre::message::Mailbox = message
            .recipient
            .parse()
            .map_err(|e| DispatchError::Mail(format!("Invalid recipient address: {e}")))?;

        lettre::Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| DispatchError::Mail(e.to_string()))
    }
}

#[cfg(feature = "smtp")]
#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: &MailMessage) -> DispatchResult<()> {
        use lettre::AsyncTransport;

        let email = self.compose(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| DispatchError::Mail(e.to_string()))?;

        tracing::debug!(recipient = %message.recipient, subject = %message.subject, "Mail delivered");
        Ok(())
    }
}

// =============================================================================
// LOG TRANSPORT
// =============================================================================

/// Mail transport that records outgoing mail in the log instead of
/// delivering it. Used when no mail server is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailTransport {
    sender: Option<String>,
}

impl LogMailTransport {
    /// Creates a transport logging mail as sent from `sender`.
    #[must_use]
    pub fn new(sender: Option<String>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl MailTransport for LogMailTransport {
    async fn send(&self, message: &MailMessage) -> DispatchResult<()> {
        tracing::info!(
            sender = self.sender.as_deref().unwrap_or("<unset>"),
            recipient = %message.recipient,
            subject = %message.subject,
            "Mail dispatched"
        );
        tracing::debug!(body = %message.body, "Mail body");
        Ok(())
    }
}

// =============================================================================
// RECORDING MOCKS
// =============================================================================

#[cfg(any(test, feature = "mock-dispatch"))]
pub use recording::{RecordingMailTransport, RecordingPushGateway};

#[cfg(any(test, feature = "mock-dispatch"))]
mod recording {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;

    use super::{
        DispatchError, DispatchResult, MailMessage, MailTransport, PushDestination, PushGateway,
        PushMessage,
    };

    /// Push gateway that keeps every notification in memory.
    #[derive(Debug, Default)]
    pub struct RecordingPushGateway {
        sent: Mutex<Vec<(PushMessage, PushDestination)>>,
        failing: AtomicBool,
    }

    impl RecordingPushGateway {
        /// Creates an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent send fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Notifications delivered so far.
        #[must_use]
        pub fn sent(&self) -> Vec<(PushMessage, PushDestination)> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl PushGateway for RecordingPushGateway {
        async fn send(
            &self,
            message: &PushMessage,
            destination: &PushDestination,
        ) -> DispatchResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DispatchError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((message.clone(), destination.clone()));
            Ok(())
        }
    }

    /// Mail transport that keeps every mail in memory.
    #[derive(Debug, Default)]
    pub struct RecordingMailTransport {
        sent: Mutex<Vec<MailMessage>>,
        failing: AtomicBool,
    }

    impl RecordingMailTransport {
        /// Creates an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent send fail (or succeed again).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Mail delivered so far.
        #[must_use]
        pub fn sent(&self) -> Vec<MailMessage> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl MailTransport for RecordingMailTransport {
        async fn send(&self, message: &MailMessage) -> DispatchResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DispatchError::Mail("connection refused".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_targets() {
        assert_eq!(
            PushDestination::admins().target(),
            "/topics/geofence-administrators"
        );
        assert_eq!(PushDestination::Device("tok".into()).target(), "tok");
    }

    #[tokio::test]
    async fn test_recording_gateway_records_and_fails() {
        let gateway = RecordingPushGateway::new();
        let message = PushMessage {
            title: "t".into(),
            body: "b".into(),
        };

        gateway
            .send(&message, &PushDestination::admins())
            .await
            .unwrap();
        gateway.set_failing(true);
        assert!(gateway
            .send(&message, &PushDestination::admins())
            .await
            .is_err());

        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let transport = LogMailTransport::new(Some("noreply@example.org".into()));
        let message = MailMessage {
            recipient: "a@example.org".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(transport.send(&message).await.is_ok());
    }

    #[cfg(feature = "fcm")]
    #[tokio::test]
    async fn test_fcm_without_keys_is_not_configured() {
        let gateway = FcmGateway::new(PushConfig::default());
        let message = PushMessage {
            title: "t".into(),
            body: "b".into(),
        };
        let err = gateway
            .send(&message, &PushDestination::Device("tok".into()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, DispatchError::NotConfigured { ref key } if key == "push.device_server_key")
        );
    }

    #[cfg(feature = "smtp")]
    fn smtp_config() -> MailConfig {
        MailConfig {
            host: Some("localhost".into()),
            port: Some(2525),
            sender_address: Some("noreply@example.org".into()),
            sender_name: Some("Geofencing".into()),
            ..MailConfig::default()
        }
    }

    #[cfg(feature = "smtp")]
    #[test]
    fn test_smtp_requires_host() {
        let config = MailConfig {
            host: None,
            ..smtp_config()
        };
        let err = SmtpMailTransport::new(&config).unwrap_err();
        assert!(matches!(err, DispatchError::NotConfigured { ref key } if key == "mail.host"));
    }

    #[cfg(feature = "smtp")]
    #[test]
    fn test_smtp_rejects_invalid_sender() {
        let config = MailConfig {
            sender_address: Some("not an address".into()),
            ..smtp_config()
        };
        let err = SmtpMailTransport::new(&config).unwrap_err();
        assert!(matches!(err, DispatchError::Mail(_)));
    }

    #[cfg(feature = "smtp")]
    #[test]
    fn test_smtp_composes_plain_text_mail() {
        let transport = SmtpMailTransport::new(&smtp_config()).unwrap();
        let message = MailMessage {
            recipient: "a@example.org".into(),
            subject: "Verify".into(),
            body: "Hello".into(),
        };

        let formatted = String::from_utf8(transport.compose(&message).unwrap().formatted()).unwrap();
        assert!(formatted.contains("To: a@example.org"));
        assert!(formatted.contains("Subject: Verify"));
        assert!(formatted.contains("noreply@example.org"));

        let bad = MailMessage {
            recipient: "nobody".into(),
            ..message
        };
        assert!(matches!(transport.compose(&bad), Err(DispatchError::Mail(_))));
    }
}
