//! Email dispatch over pluggable transports, sent directly or through the
//! job queue.
//!
//! # Quick Start
//!
//! ```ignore
//! // 1. Settings decide the driver, the sender and whether mail is queued
//! let settings = Settings::from_env_with_prefix("NOTIFIER")?;
//! let queue = Arc::new(MemoryQueue::new());
//! let mailer = Mailer::new(settings).with_queue(queue.clone());
//! mailer.views().register("welcome", "<p>Hi {{name}}</p>")?;
//!
//! // 2. Send now, or let `email.queue` decide
//! let callback = Composition::new().to("jane@example.com", Some("Jane")).subject("Welcome");
//! mailer.push("welcome", data, callback, None).await?;
//!
//! // 3. Process queued mail
//! let registry = JobRegistry::new().register::<SendQueuedMail>();
//! Worker::new(queue, registry, mailer).start();
//! ```
//!
//! # Settings
//!
//! | Key | Description |
//! |-----|-------------|
//! | `email.driver` | `smtp`, `sendmail`, `mail`, `ses`, `mailgun`, `log` or `array` |
//! | `email.from.address` / `email.from.name` | Global sender |
//! | `email.queue` | `true` routes [`Mailer::push`] through the queue |
//! | `email.*` | Driver fields, see [`TransportConfig`] |

mod callback;
mod inliner;
mod job;
mod mailer;
mod message;
mod notifier;
mod transport;
mod view;

pub use callback::{Address, Callback, CallbackRegistry, Composition, QueuedCallback};
pub use inliner::{BeforeSending, CssInliner};
pub use job::{HasMailer, SendQueuedMail};
pub use mailer::{Content, Mailable, Mailer, MailerBuilder, Receipt};
pub use message::{Email, EmailBody, Message};
pub use notifier::{Notifier, Recipient};
pub use transport::{
    ArrayTransport, Delivery, Driver, Encryption, HostMailConfig, HttpOptions, LogTransport,
    MailgunTransport, SendmailMode, SendmailTransport, SesCredentials, SesTransport,
    SmtpTransport, StreamOptions, Transport, TransportConfig, TransportManager,
    DEFAULT_LOG_CHANNEL, DEFAULT_MAILGUN_ENDPOINT, DEFAULT_SENDMAIL_COMMAND, DEFAULT_SES_REGION,
};
pub use view::{Data, View, Views};

use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::jobs::JobError;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("missing required config: {0}")]
    MissingConfig(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unsupported mail driver [{0}]")]
    UnsupportedDriver(String),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("view error: {0}")]
    View(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("sendmail error: {0}")]
    Sendmail(String),

    #[error("{provider} API returned {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queued delivery requested but no queue backend is configured")]
    QueueNotConfigured,

    #[error("cannot serialize for queue: {0}")]
    Serialization(String),

    #[error("no callback registered for [{0}]")]
    UnknownCallback(String),

    #[error("CSS inlining failed: {0}")]
    Inline(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MailError {
    /// Whether the error comes from configuration rather than delivery.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MailError::MissingConfig(_)
                | MailError::InvalidConfig(_)
                | MailError::UnsupportedDriver(_)
                | MailError::QueueNotConfigured
                | MailError::Config(_)
        )
    }
}
