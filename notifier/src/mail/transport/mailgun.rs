use std::any::Any;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{Delivery, Driver, Transport, TransportConfig};
use crate::mail::{Email, MailError};

pub const DEFAULT_MAILGUN_ENDPOINT: &str = "api.mailgun.net";

/// Mailgun's MIME endpoint: the fully formatted message is uploaded as-is.
#[derive(Clone)]
pub struct MailgunTransport {
    client: reqwest::Client,
    secret: String,
    domain: String,
    endpoint: String,
}

impl MailgunTransport {
    pub fn from_config(config: &TransportConfig) -> Result<Self, MailError> {
        let secret = config
            .secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MailError::MissingConfig("email.secret".into()))?;
        let domain = config
            .domain
            .clone()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| MailError::MissingConfig("email.domain".into()))?;
        let endpoint = config
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_MAILGUN_ENDPOINT.to_string());

        Ok(Self {
            client: config.http.client()?,
            secret,
            domain,
            endpoint,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `https://{endpoint}/v3/{domain}/messages.mime`. An endpoint that already
    /// carries a scheme is used as the base unchanged.
    pub fn url(&self) -> String {
        let base = if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.endpoint.trim_end_matches('/'))
        };
        format!("{base}/v3/{}/messages.mime", self.domain)
    }
}

#[derive(Deserialize)]
struct MailgunResponse {
    id: Option<String>,
}

#[async_trait]
impl Transport for MailgunTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        let message = email.to_message()?;
        let to = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let form = Form::new().text("to", to).part(
            "message",
            Part::bytes(message.formatted()).file_name("message.mime"),
        );

        let response = self
            .client
            .post(self.url())
            .basic_auth("api", Some(&self.secret))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Api {
                provider: "mailgun",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: MailgunResponse = response.json().await?;
        let id = parsed
            .id
            .map(|id| id.trim_start_matches('<').trim_end_matches('>').to_string());
        tracing::debug!(domain = %self.domain, message_id = ?id, "mailgun delivery accepted");
        Ok(Delivery::new(id))
    }

    fn driver(&self) -> Driver {
        Driver::Mailgun
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
