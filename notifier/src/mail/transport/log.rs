use std::any::Any;

use async_trait::async_trait;

use super::{message_id, Delivery, Driver, Transport};
use crate::mail::{Email, MailError};

pub const DEFAULT_LOG_CHANNEL: &str = "mail";

/// Writes the full rendered message to the log instead of sending it.
#[derive(Debug, Clone)]
pub struct LogTransport {
    channel: String,
}

impl LogTransport {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        let message = email.to_message()?;
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();

        tracing::info!(
            target: "notifier::mail",
            channel = %self.channel,
            to = ?email.to,
            subject = %email.subject,
            message = %raw,
            "email logged"
        );

        Ok(Delivery::new(message_id(&message)))
    }

    fn driver(&self) -> Driver {
        Driver::Log
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
