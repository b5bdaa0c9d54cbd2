//! SMTP transport using lettre.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::{message_id, Delivery, Driver, Transport, TransportConfig};
use crate::mail::{Email, MailError};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Plain connection, no TLS at all.
    None,
    /// Upgrade with STARTTLS after connecting.
    StartTls,
    /// TLS from the first byte (SMTPS).
    Tls,
}

impl Encryption {
    /// `None`/empty and `"none"` mean unencrypted. `"tls"` and `"starttls"`
    /// negotiate STARTTLS; `"ssl"` wraps the connection.
    pub fn parse(value: Option<&str>) -> Result<Self, MailError> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("none") | Some("null") => Ok(Encryption::None),
            Some("tls") | Some("starttls") => Ok(Encryption::StartTls),
            Some("ssl") | Some("smtps") => Ok(Encryption::Tls),
            Some(other) => Err(MailError::InvalidConfig(format!(
                "email.encryption: unsupported value {other:?}"
            ))),
        }
    }
}

/// TLS peer-verification options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub verify_peer: Option<bool>,
    #[serde(default)]
    pub verify_peer_name: Option<bool>,
    /// Name to verify the certificate against instead of `host`.
    #[serde(default)]
    pub peer_name: Option<String>,
}

#[derive(Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    encryption: Encryption,
    credentials: Option<(String, String)>,
    timeout: Option<Duration>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// Build from `email.*` settings. `host` and `port` are required.
    pub fn from_config(config: &TransportConfig) -> Result<Self, MailError> {
        let host = config
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| MailError::MissingConfig("email.host".into()))?;
        let port = config
            .port
            .ok_or_else(|| MailError::MissingConfig("email.port".into()))?;
        let encryption = Encryption::parse(config.encryption.as_deref())?;
        let stream = config.stream.clone().unwrap_or_default();

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host).port(port);

        match encryption {
            Encryption::None => {}
            Encryption::StartTls => {
                builder = builder.tls(Tls::Required(tls_parameters(&host, &stream)?));
            }
            Encryption::Tls => {
                builder = builder.tls(Tls::Wrapper(tls_parameters(&host, &stream)?));
            }
        }

        let timeout = config.timeout.map(Duration::from_secs);
        if timeout.is_some() {
            builder = builder.timeout(timeout);
        }

        let credentials = match (&config.username, &config.password) {
            (Some(username), password) if !username.is_empty() => {
                let password = password.clone().unwrap_or_default();
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                Some((username.clone(), password))
            }
            _ => None,
        };

        Ok(Self {
            host,
            port,
            encryption,
            credentials,
            timeout,
            transport: builder.build(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(u, _)| u.as_str())
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(_, p)| p.as_str())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

fn tls_parameters(host: &str, stream: &StreamOptions) -> Result<TlsParameters, MailError> {
    let domain = stream.peer_name.as_deref().unwrap_or(host);
    let mut builder = TlsParameters::builder(domain.to_string());

    if stream.verify_peer == Some(false) {
        builder = builder.dangerous_accept_invalid_certs(true);
    }
    if stream.verify_peer_name == Some(false) {
        builder = builder.dangerous_accept_invalid_hostnames(true);
    }

    builder.build().map_err(|e| MailError::Smtp(e.to_string()))
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        let message = email.to_message()?;
        let id = message_id(&message);

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        tracing::debug!(host = %self.host, port = self.port, "smtp delivery accepted");
        Ok(Delivery::new(id))
    }

    fn driver(&self) -> Driver {
        Driver::Smtp
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig {
            host: Some("smtp.mailgun.org".into()),
            port: Some(587),
            encryption: Some("tls".into()),
            username: Some("admin@example.com".into()),
            password: Some("123456".into()),
            ..TransportConfig::new("smtp")
        }
    }

    #[test]
    fn encryption_names() {
        assert_eq!(Encryption::parse(None).unwrap(), Encryption::None);
        assert_eq!(Encryption::parse(Some("TLS")).unwrap(), Encryption::StartTls);
        assert_eq!(Encryption::parse(Some("ssl")).unwrap(), Encryption::Tls);
        assert!(matches!(
            Encryption::parse(Some("rot13")),
            Err(MailError::InvalidConfig(_))
        ));
    }

    #[test]
    fn from_config_keeps_connection_settings() {
        let smtp = SmtpTransport::from_config(&config()).unwrap();

        assert_eq!(smtp.host(), "smtp.mailgun.org");
        assert_eq!(smtp.port(), 587);
        assert_eq!(smtp.encryption(), Encryption::StartTls);
        assert_eq!(smtp.username(), Some("admin@example.com"));
        assert_eq!(smtp.password(), Some("123456"));
        assert_eq!(smtp.timeout(), None);
    }

    #[test]
    fn missing_host_or_port_is_a_config_error() {
        let mut no_host = config();
        no_host.host = None;
        assert!(matches!(
            SmtpTransport::from_config(&no_host),
            Err(MailError::MissingConfig(k)) if k == "email.host"
        ));

        let mut no_port = config();
        no_port.port = None;
        assert!(matches!(
            SmtpTransport::from_config(&no_port),
            Err(MailError::MissingConfig(k)) if k == "email.port"
        ));
    }

    #[test]
    fn no_username_means_no_auth() {
        let mut anonymous = config();
        anonymous.username = None;
        anonymous.encryption = None;

        let smtp = SmtpTransport::from_config(&anonymous).unwrap();
        assert_eq!(smtp.username(), None);
        assert_eq!(smtp.encryption(), Encryption::None);
    }
}
