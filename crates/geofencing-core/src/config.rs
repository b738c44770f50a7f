//! Deployment configuration.
//!
//! Configuration is read once at startup from an optional TOML file and
//! environment overrides (`GEOFENCING__SECTION__KEY`). Every section is
//! optional; values that a feature needs are checked when the feature is
//! used, through the `require_*` accessors, which treat empty strings as
//! unset.
//!
//! When a feature finds its section missing, [`Config::write_template`]
//! appends a commented skeleton of that section to the loaded file so the
//! operator knows what to fill in.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "GEOFENCING_CONFIG";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GEOFENCING";

/// Push gateway endpoint used when `push.gateway_url` is not set.
pub const DEFAULT_GATEWAY_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Errors raised while loading or querying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value needed by a feature is missing or empty.
    #[error("Configuration value '{key}' is not set")]
    ValueNotSet {
        /// Dotted key of the missing value.
        key: String,
    },

    /// A value is present but unusable.
    #[error("Invalid configuration value for '{field}': {message}")]
    ValidationError {
        /// Dotted key of the offending value.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Layered loading failed.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration file is not valid TOML.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A configuration document could not be rendered.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading the configuration file failed.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the configuration file failed.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No platform configuration directory could be determined.
    #[error("Cannot determine configuration directory")]
    NoConfigDir,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn not_set(key: &str) -> ConfigError {
    ConfigError::ValueNotSet {
        key: key.to_string(),
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Installation identity.
    pub system: SystemConfig,
    /// Document store location.
    pub storage: StorageConfig,
    /// Mail opt-in and transport settings.
    pub mail: MailConfig,
    /// Push gateway settings.
    pub push: PushConfig,

    #[serde(skip)]
    source: Option<PathBuf>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_address: String,
    /// Port to listen on.
    pub port: u16,
    /// Shared administrator secret.
    pub admin_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            admin_secret: None,
        }
    }
}

impl ServerConfig {
    /// Returns the administrator secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the secret is missing or empty.
    pub fn require_admin_secret(&self) -> ConfigResult<&str> {
        non_empty(self.admin_secret.as_ref()).ok_or_else(|| not_set("server.admin_secret"))
    }
}

/// Installation identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Beacon namespace UUID shared by every beacon of the installation.
    pub uuid: Option<String>,
}

impl SystemConfig {
    /// Returns the parsed system UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is unset or not a UUID.
    pub fn require_uuid(&self) -> ConfigResult<Uuid> {
        let raw = non_empty(self.uuid.as_ref()).ok_or_else(|| not_set("system.uuid"))?;
        Uuid::parse_str(raw.trim()).map_err(|e| ConfigError::ValidationError {
            field: "system.uuid".to_string(),
            message: e.to_string(),
        })
    }
}

/// Document store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the collection files. Falls back to the platform
    /// data directory.
    pub data_dir: Option<PathBuf>,
    /// Keep everything in memory and never touch the disk.
    pub in_memory: bool,
}

/// Transport encryption for the mail server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptMethod {
    /// Implicit TLS.
    Ssl,
    /// STARTTLS.
    Tls,
}

/// Mail opt-in and transport settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Public base URL of the service, used to build verification links.
    pub service_url: Option<String>,
    /// Mail server host.
    pub host: Option<String>,
    /// Mail server port.
    pub port: Option<u16>,
    /// Mail server transport encryption.
    pub encrypt_method: Option<EncryptMethod>,
    /// Mail server login.
    pub username: Option<String>,
    /// Mail server password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Sender address.
    pub sender_address: Option<String>,
    /// Sender display name.
    pub sender_name: Option<String>,
    /// Seconds within which a verification link is accepted.
    pub confirmation_timeout_secs: Option<u64>,
    /// Seconds after which a pending request is purged.
    pub delete_timeout_secs: Option<u64>,
}

/// Resolved opt-in timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailTimeouts {
    /// Window in which a confirmation is accepted.
    pub confirmation: Duration,
    /// Age after which a pending request is purged.
    pub delete: Duration,
}

impl MailConfig {
    /// Returns the opt-in timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if either timeout is unset or if the confirmation
    /// window is longer than the purge age.
    pub fn timeouts(&self) -> ConfigResult<MailTimeouts> {
        let confirmation = self
            .confirmation_timeout_secs
            .ok_or_else(|| not_set("mail.confirmation_timeout_secs"))?;
        let delete = self
            .delete_timeout_secs
            .ok_or_else(|| not_set("mail.delete_timeout_secs"))?;

        if confirmation > delete {
            return Err(ConfigError::ValidationError {
                field: "mail.confirmation_timeout_secs".to_string(),
                message: format!("must not exceed mail.delete_timeout_secs ({delete})"),
            });
        }

        Ok(MailTimeouts {
            confirmation: Duration::from_secs(confirmation),
            delete: Duration::from_secs(delete),
        })
    }

    /// Returns the public service URL that verification links are built on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the URL is missing or empty and
    /// [`ConfigError::ValidationError`] if it is not an absolute http(s) URL.
    pub fn require_service_url(&self) -> ConfigResult<Url> {
        let raw = non_empty(self.service_url.as_ref()).ok_or_else(|| not_set("mail.service_url"))?;
        let invalid = |message: String| ConfigError::ValidationError {
            field: "mail.service_url".to_string(),
            message,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("'{raw}' is not an http(s) base URL")));
        }
        Ok(url)
    }

    /// Returns the mail server host.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the host is missing or empty.
    pub fn require_host(&self) -> ConfigResult<&str> {
        non_empty(self.host.as_ref()).ok_or_else(|| not_set("mail.host"))
    }

    /// Returns the login, if both user name and password are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((
            non_empty(self.username.as_ref())?,
            non_empty(self.password.as_ref())?,
        ))
    }

    /// Returns the sender address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the address is missing or empty.
    pub fn require_sender_address(&self) -> ConfigResult<&str> {
        non_empty(self.sender_address.as_ref()).ok_or_else(|| not_set("mail.sender_address"))
    }

    /// Checks every value needed to send verification mail.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid value.
    pub fn validate(&self) -> ConfigResult<()> {
        self.timeouts()?;
        self.require_service_url()?;
        self.require_sender_address()?;
        Ok(())
    }
}

/// Push gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Gateway endpoint. Defaults to [`DEFAULT_GATEWAY_URL`].
    pub gateway_url: Option<String>,
    /// Server key for the administrator topic.
    #[serde(skip_serializing)]
    pub admin_server_key: Option<String>,
    /// Server key for device tokens.
    #[serde(skip_serializing)]
    pub device_server_key: Option<String>,
}

/// Endpoint and key for one push audience.
#[derive(Clone, PartialEq, Eq)]
pub struct PushCredentials {
    /// Gateway endpoint.
    pub gateway_url: String,
    /// Server key sent with each request.
    pub server_key: String,
}

impl fmt::Debug for PushCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushCredentials")
            .field("gateway_url", &self.gateway_url)
            .field("server_key", &"<redacted>")
            .finish()
    }
}

impl PushConfig {
    /// Returns the configured gateway endpoint.
    #[must_use]
    pub fn gateway_url(&self) -> &str {
        non_empty(self.gateway_url.as_ref()).unwrap_or(DEFAULT_GATEWAY_URL)
    }

    /// Credentials for administrator broadcasts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the admin key is missing.
    pub fn require_admin(&self) -> ConfigResult<PushCredentials> {
        let key =
            non_empty(self.admin_server_key.as_ref()).ok_or_else(|| not_set("push.admin_server_key"))?;
        Ok(PushCredentials {
            gateway_url: self.gateway_url().to_string(),
            server_key: key.to_string(),
        })
    }

    /// Credentials for device notifications.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValueNotSet`] if the device key is missing.
    pub fn require_device(&self) -> ConfigResult<PushCredentials> {
        let key = non_empty(self.device_server_key.as_ref())
            .ok_or_else(|| not_set("push.device_server_key"))?;
        Ok(PushCredentials {
            gateway_url: self.gateway_url().to_string(),
            server_key: key.to_string(),
        })
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl Config {
    /// Loads the configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads the configuration from `path` (optional) plus environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut loaded: Self = settings.try_deserialize()?;
        loaded.source = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(loaded)
    }

    /// File this configuration was loaded from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Returns the system UUID, generating and persisting one when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a UUID or the file cannot
    /// be updated.
    pub fn ensure_system_uuid(&mut self) -> ConfigResult<Uuid> {
        match self.system.require_uuid() {
            Ok(uuid) => return Ok(uuid),
            Err(ConfigError::ValueNotSet { .. }) => {}
            Err(e) => return Err(e),
        }

        let uuid = Uuid::new_v4();
        self.system.uuid = Some(uuid.to_string());

        if let Some(path) = &self.source {
            let content = read_optional(path)?;
            let mut table: toml::Table = content.parse()?;
            if let Some(system) = table.get_mut("system").and_then(toml::Value::as_table_mut) {
                system.insert("uuid".to_string(), toml::Value::String(uuid.to_string()));
                write_file(path, &toml::to_string_pretty(&table)?)?;
            } else {
                let mut updated = content;
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(&format!("\n[system]\nuuid = \"{uuid}\"\n"));
                write_file(path, &updated)?;
            }
            tracing::info!(path = %path.display(), %uuid, "Generated system UUID");
        }

        Ok(uuid)
    }

    /// Appends a commented skeleton of `section` to the loaded file unless the
    /// section or its skeleton is already present. Returns `true` if the file
    /// was changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn write_template(&self, section: ConfigSection) -> ConfigResult<bool> {
        let Some(path) = &self.source else {
            return Ok(false);
        };

        let content = read_optional(path)?;
        let table: toml::Table = content.parse()?;
        if table.contains_key(section.name()) || content.contains(&section.marker()) {
            return Ok(false);
        }

        let mut updated = content;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push('\n');
        updated.push_str(section.template());
        write_file(path, &updated)?;

        tracing::info!(
            path = %path.display(),
            section = section.name(),
            "Appended configuration template"
        );
        Ok(true)
    }
}

/// Sections that have a generated template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    /// `[server]`
    Server,
    /// `[mail]`
    Mail,
    /// `[push]`
    Push,
}

impl ConfigSection {
    /// TOML table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Mail => "mail",
            Self::Push => "push",
        }
    }

    fn marker(self) -> String {
        format!("# [{}]", self.name())
    }

    const fn template(self) -> &'static str {
        match self {
            Self::Server => {
                "# [server]\n\
                 # bind_address = \"0.0.0.0\"\n\
                 # port = 8080\n\
                 # admin_secret = \"\"\n"
            }
            Self::Mail => {
                "# [mail]\n\
                 # service_url = \"https://geofencing.example.org/\"\n\
                 # host = \"\"\n\
                 # port = 465\n\
                 # encrypt_method = \"ssl\"\n\
                 # username = \"\"\n\
                 # password = \"\"\n\
                 # sender_address = \"\"\n\
                 # sender_name = \"\"\n\
                 # confirmation_timeout_secs = 86400\n\
                 # delete_timeout_secs = 604800\n"
            }
            Self::Push => {
                "# [push]\n\
                 # gateway_url = \"https://fcm.googleapis.com/fcm/send\"\n\
                 # admin_server_key = \"\"\n\
                 # device_server_key = \"\"\n"
            }
        }
    }
}

/// Returns the configuration file path.
///
/// `GEOFENCING_CONFIG` wins; otherwise `/etc/geofencing/config.toml` on Linux
/// and the platform configuration directory elsewhere.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] if no platform directory exists.
pub fn config_path() -> ConfigResult<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/geofencing/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "geofencing")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn read_optional(path: &Path) -> ConfigResult<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn write_file(path: &Path, content: &str) -> ConfigResult<()> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    };
    write().map_err(|source| ConfigError::WriteError {
        path: path.display().to_string(),
        source,
    })
}
