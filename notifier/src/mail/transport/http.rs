use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mail::MailError;

const DEFAULT_CONNECT_TIMEOUT: u64 = 60;

/// HTTP client options for API-based transports (`email.http.*`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpOptions {
    /// Seconds; defaults to 60.
    #[serde(default)]
    pub connect_timeout: Option<u64>,
    /// Whole-request timeout in seconds. Unbounded when unset.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl HttpOptions {
    pub(crate) fn client(&self) -> Result<reqwest::Client, MailError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(
            self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        ));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        builder.build().map_err(MailError::Http)
    }
}
