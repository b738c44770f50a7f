//! Application state shared across handlers.

use std::sync::Arc;

use geofencing_core::{
    Config, FcmGateway, GeofenceEngine, LogMailTransport, MailTransport, PushGateway,
    SmtpMailTransport, Store,
};

/// Shared application state handed to every handler.
pub type SharedState = Arc<AppState>;

/// Application state.
#[derive(Debug)]
pub struct AppState {
    engine: Arc<GeofenceEngine>,
}

impl AppState {
    /// Wraps an already started engine.
    #[must_use]
    pub fn new(engine: Arc<GeofenceEngine>) -> SharedState {
        Arc::new(Self { engine })
    }

    /// Opens the store, builds the dispatch collaborators from `config` and
    /// starts the engine.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened, the configuration
    /// lacks the system UUID or the mail server settings are unusable.
    pub fn from_config(config: Config) -> anyhow::Result<SharedState> {
        let store = if config.storage.in_memory {
            tracing::warn!("Using in-memory store, nothing will be persisted");
            Store::in_memory()
        } else {
            let dir = match &config.storage.data_dir {
                Some(dir) => dir.clone(),
                None => geofencing_core::default_data_dir()?,
            };
            Store::open(dir)?
        };

        let push: Arc<dyn PushGateway> = Arc::new(FcmGateway::new(config.push.clone()));
        let mail: Arc<dyn MailTransport> = if config.mail.require_host().is_ok() {
            Arc::new(SmtpMailTransport::new(&config.mail)?)
        } else {
            tracing::warn!("No mail server configured, outgoing mail is only logged");
            Arc::new(LogMailTransport::new(config.mail.sender_address.clone()))
        };

        let engine = Arc::new(GeofenceEngine::new(config, Arc::new(store), push, mail)?);
        engine.start()?;

        Ok(Self::new(engine))
    }

    /// The geofencing engine.
    #[must_use]
    pub fn engine(&self) -> &GeofenceEngine {
        &self.engine
    }
}
