//! Transport selection: one [`Transport`] per configured driver.
//!
//! [`TransportManager::resolve`] is the factory. It maps a [`TransportConfig`]
//! onto one of the [`Driver`] variants and performs no I/O; connections,
//! HTTP calls and process spawns happen on the first delivery.
//!
//! | Driver | Required fields | Secure fields |
//! |--------|-----------------|---------------|
//! | `smtp` | `host`, `port` | `password` (when `username` is set) |
//! | `sendmail` | | |
//! | `mail` | | |
//! | `ses` | `region` (default `us-east-1`) | `key`, `secret`, `token` |
//! | `mailgun` | `domain` | `secret` |
//! | `log` | | |
//! | `array` | | |

mod array;
mod http;
mod log;
mod mailgun;
mod sendmail;
mod ses;
mod smtp;

pub use array::ArrayTransport;
pub use http::HttpOptions;
pub use log::{LogTransport, DEFAULT_LOG_CHANNEL};
pub use mailgun::{MailgunTransport, DEFAULT_MAILGUN_ENDPOINT};
pub use sendmail::{SendmailMode, SendmailTransport, DEFAULT_SENDMAIL_COMMAND};
pub use ses::{SesCredentials, SesTransport, DEFAULT_SES_REGION};
pub use smtp::{Encryption, SmtpTransport, StreamOptions};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::callback::Address;
use super::message::Email;
use super::MailError;
use crate::config::Settings;

/// Delivers composed emails through one backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver one email.
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError>;

    /// The driver this transport was built for.
    fn driver(&self) -> Driver;

    /// Downcast hook for inspecting a concrete transport.
    fn as_any(&self) -> &dyn Any;
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Message id assigned locally or by the provider, when known.
    pub message_id: Option<String>,
}

impl Delivery {
    pub fn new(message_id: Option<String>) -> Self {
        Self { message_id }
    }
}

/// Message-ID header lettre stamped on the message, without angle brackets.
pub(crate) fn message_id(message: &lettre::Message) -> Option<String> {
    message
        .headers()
        .get_raw("Message-ID")
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
}

/// Known transport backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Smtp,
    Sendmail,
    /// Local `mail` command, always the default sendmail invocation.
    Mail,
    Ses,
    Mailgun,
    Log,
    Array,
}

impl Driver {
    pub const ALL: [Driver; 7] = [
        Driver::Smtp,
        Driver::Sendmail,
        Driver::Mail,
        Driver::Ses,
        Driver::Mailgun,
        Driver::Log,
        Driver::Array,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Smtp => "smtp",
            Driver::Sendmail => "sendmail",
            Driver::Mail => "mail",
            Driver::Ses => "ses",
            Driver::Mailgun => "mailgun",
            Driver::Log => "log",
            Driver::Array => "array",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Driver {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Driver::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| MailError::UnsupportedDriver(s.to_string()))
    }
}

/// Driver name plus every driver-specific field, as stored under `email.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default, alias = "transport")]
    pub driver: String,

    // smtp
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u16")]
    pub port: Option<u16>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub stream: Option<StreamOptions>,
    /// Name announced in EHLO (smtp, sendmail `-bs`).
    #[serde(default)]
    pub local_domain: Option<String>,

    // sendmail
    #[serde(default)]
    pub sendmail: Option<String>,

    // ses
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing)]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing)]
    pub secret: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing)]
    pub token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,

    // mailgun
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,

    // log
    #[serde(default)]
    pub log_channel: Option<String>,

    // ses, mailgun
    #[serde(default, alias = "guzzle")]
    pub http: HttpOptions,
}

impl TransportConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }
}

/// The host application's own mail configuration, used when the settings
/// store names no driver.
///
/// Reads `MAIL_DEFAULT` and `MAIL_MAILERS__<NAME>__<FIELD>` via
/// [`EnvConfig::from_env_nested`](crate::config::EnvConfig::from_env_nested).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostMailConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub mailers: HashMap<String, TransportConfig>,
    /// Global sender used when the settings store names none.
    #[serde(default)]
    pub from: Option<Address>,
}

impl HostMailConfig {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            mailers: HashMap::new(),
            from: None,
        }
    }

    pub fn mailer(mut self, name: impl Into<String>, config: TransportConfig) -> Self {
        self.mailers.insert(name.into(), config);
        self
    }

    /// Config for a named mailer. A mailer with no explicit driver uses its name.
    fn transport_config(&self, name: &str) -> TransportConfig {
        let mut config = self
            .mailers
            .get(name)
            .cloned()
            .unwrap_or_default();
        if config.driver.is_empty() {
            config.driver = name.to_string();
        }
        config
    }
}

/// Builds transports from the settings store and caches them per driver.
pub struct TransportManager {
    settings: Settings,
    host: Option<HostMailConfig>,
    fallback: AtomicBool,
    drivers: Mutex<HashMap<String, Arc<dyn Transport>>>,
}

impl TransportManager {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            host: None,
            fallback: AtomicBool::new(false),
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Host configuration consulted in fallback mode.
    pub fn with_host_config(mut self, host: HostMailConfig) -> Self {
        self.host = Some(host);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn host_config(&self) -> Option<&HostMailConfig> {
        self.host.as_ref()
    }

    /// Whether resolution has switched to the host configuration.
    pub fn using_fallback(&self) -> bool {
        self.fallback.load(Ordering::Acquire)
    }

    /// The driver named by `email.driver`, or the host default.
    ///
    /// Falling back flips the manager into fallback mode for good.
    pub fn default_driver(&self) -> Result<String, MailError> {
        if let Some(driver) = self.settings.get_string("email.driver") {
            return Ok(driver);
        }

        if !self.fallback.swap(true, Ordering::AcqRel) {
            tracing::info!("no email.driver configured, falling back to host mail configuration");
        }

        self.host
            .as_ref()
            .and_then(|host| host.default.clone())
            .ok_or_else(|| MailError::MissingConfig("email.driver".into()))
    }

    /// Get (and cache) the transport for `name`, or for the default driver.
    pub async fn driver(&self, name: Option<&str>) -> Result<Arc<dyn Transport>, MailError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_driver()?,
        };
        let fallback = self.using_fallback();
        let cache_key = if fallback {
            format!("host:{name}")
        } else {
            name.clone()
        };

        if let Some(transport) = self.cached(&cache_key) {
            return Ok(transport);
        }

        let config = if fallback {
            self.host_transport_config(&name)?
        } else {
            self.transport_config(&name).await?
        };
        let transport = Self::resolve(&config)?;

        let mut drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(drivers.entry(cache_key).or_insert(transport).clone())
    }

    fn cached(&self, key: &str) -> Option<Arc<dyn Transport>> {
        let drivers = self.drivers.lock().unwrap_or_else(|e| e.into_inner());
        drivers.get(key).cloned()
    }

    fn host_transport_config(&self, name: &str) -> Result<TransportConfig, MailError> {
        self.host
            .as_ref()
            .map(|host| host.transport_config(name))
            .ok_or_else(|| MailError::MissingConfig(format!("mail.mailers.{name}")))
    }

    /// Read `email.*` for `driver`, filling secret fields through the secure lookup.
    pub async fn transport_config(&self, driver: &str) -> Result<TransportConfig, MailError> {
        let mut config: TransportConfig = self
            .settings
            .get_as("email")
            .map_err(|e| MailError::InvalidConfig(format!("email: {e}")))?
            .unwrap_or_default();
        config.driver = driver.to_string();

        match driver {
            "smtp" => {
                if config.username.is_some() {
                    config.password = self.settings.secure_get("email.password").await?;
                }
            }
            "ses" => {
                config.key = self.settings.secure_get("email.key").await?;
                config.secret = self.settings.secure_get("email.secret").await?;
                config.token = self.settings.secure_get("email.token").await?;
            }
            "mailgun" => {
                config.secret = self.settings.secure_get("email.secret").await?;
            }
            _ => {}
        }

        Ok(config)
    }

    /// Construct the transport a config describes.
    ///
    /// Fails with [`MailError::UnsupportedDriver`] before building anything
    /// when the driver is unknown.
    pub fn resolve(config: &TransportConfig) -> Result<Arc<dyn Transport>, MailError> {
        let driver: Driver = config.driver.parse()?;

        let transport: Arc<dyn Transport> = match driver {
            Driver::Smtp => Arc::new(SmtpTransport::from_config(config)?),
            Driver::Sendmail => Arc::new(
                SendmailTransport::new(config.sendmail.as_deref())?
                    .local_domain(config.local_domain.as_deref()),
            ),
            Driver::Mail => Arc::new(SendmailTransport::mail()?),
            Driver::Ses => Arc::new(SesTransport::from_config(config)?),
            Driver::Mailgun => Arc::new(MailgunTransport::from_config(config)?),
            Driver::Log => Arc::new(LogTransport::new(
                config.log_channel.as_deref().unwrap_or(DEFAULT_LOG_CHANNEL),
            )),
            Driver::Array => Arc::new(ArrayTransport::new()),
        };

        tracing::debug!(%driver, "transport resolved");
        Ok(transport)
    }
}

/// Deserializers that accept numbers and strings interchangeably, since
/// environment-sourced settings arrive as strings and file-sourced ones don't.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("expected unsigned integer, got {n}"))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }

    pub fn opt_u16<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        opt_u64(deserializer)?
            .map(|n| u16::try_from(n).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn driver_names_round_trip() {
        for driver in Driver::ALL {
            assert_eq!(driver.as_str().parse::<Driver>().unwrap(), driver);
        }
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let err = "unknown-driver".parse::<Driver>().unwrap_err();
        assert!(matches!(err, MailError::UnsupportedDriver(d) if d == "unknown-driver"));
    }

    #[test]
    fn config_accepts_numeric_strings_and_numbers() {
        let config: TransportConfig = serde_json::from_value(json!({
            "driver": "smtp",
            "port": "587",
            "password": 123456,
            "timeout": 30,
        }))
        .unwrap();

        assert_eq!(config.port, Some(587));
        assert_eq!(config.password.as_deref(), Some("123456"));
        assert_eq!(config.timeout, Some(30));
    }

    #[test]
    fn config_rejects_out_of_range_port() {
        let result: Result<TransportConfig, _> = serde_json::from_value(json!({ "port": 70000 }));
        assert!(result.is_err());
    }

    #[test]
    fn host_mailer_without_driver_uses_its_name() {
        let host = HostMailConfig::new("log").mailer("log", TransportConfig::default());
        assert_eq!(host.transport_config("log").driver, "log");
        assert_eq!(host.transport_config("array").driver, "array");
    }
}
