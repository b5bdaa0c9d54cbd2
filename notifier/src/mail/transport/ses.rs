//! Amazon SES (v2 API) transport, sending raw MIME with SigV4-signed requests.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::{Delivery, Driver, Transport, TransportConfig};
use crate::mail::{Email, MailError};

pub const DEFAULT_SES_REGION: &str = "us-east-1";

const SERVICE: &str = "ses";
const SEND_EMAIL_PATH: &str = "/v2/email/outbound-emails";

#[derive(Clone, PartialEq)]
pub struct SesCredentials {
    pub key: String,
    pub secret: String,
    pub token: Option<String>,
}

impl SesCredentials {
    /// Credentials from the standard AWS environment variables.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|k| !k.is_empty())?;
        let secret = std::env::var("AWS_SECRET_ACCESS_KEY").ok().filter(|s| !s.is_empty())?;
        let token = std::env::var("AWS_SESSION_TOKEN").ok().filter(|t| !t.is_empty());
        Some(Self { key, secret, token })
    }
}

impl fmt::Debug for SesCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SesCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct SesTransport {
    client: reqwest::Client,
    region: String,
    credentials: Option<SesCredentials>,
}

impl SesTransport {
    /// Static credentials are used only when both `key` and `secret` are
    /// non-empty; otherwise the AWS environment is read at delivery time.
    pub fn from_config(config: &TransportConfig) -> Result<Self, MailError> {
        let region = config
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_SES_REGION.to_string());

        let credentials = match (&config.key, &config.secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => Some(SesCredentials {
                key: key.clone(),
                secret: secret.clone(),
                token: config.token.clone().filter(|t| !t.is_empty()),
            }),
            _ => None,
        };

        Ok(Self {
            client: config.http.client()?,
            region,
            credentials,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn credentials(&self) -> Option<&SesCredentials> {
        self.credentials.as_ref()
    }

    fn host(&self) -> String {
        format!("email.{}.amazonaws.com", self.region)
    }

    fn resolve_credentials(&self) -> Result<SesCredentials, MailError> {
        self.credentials
            .clone()
            .or_else(SesCredentials::from_env)
            .ok_or_else(|| MailError::MissingConfig("email.key/email.secret or AWS_ACCESS_KEY_ID".into()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailResponse {
    message_id: Option<String>,
}

#[async_trait]
impl Transport for SesTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        let message = email.to_message()?;
        let recipients: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(ToString::to_string)
            .collect();

        let body = serde_json::to_vec(&json!({
            "Content": { "Raw": { "Data": BASE64_STANDARD.encode(message.formatted()) } },
            "Destination": { "ToAddresses": recipients },
        }))?;

        let credentials = self.resolve_credentials()?;
        let host = self.host();
        let signed = sign_request(
            &credentials,
            &self.region,
            &host,
            SEND_EMAIL_PATH,
            &body,
            OffsetDateTime::now_utc(),
        );

        let mut request = self
            .client
            .post(format!("https://{host}{SEND_EMAIL_PATH}"))
            .header("content-type", "application/json")
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &credentials.token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MailError::Api {
                provider: "ses",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: SendEmailResponse = response.json().await?;
        tracing::debug!(region = %self.region, message_id = ?parsed.message_id, "ses delivery accepted");
        Ok(Delivery::new(parsed.message_id))
    }

    fn driver(&self) -> Driver {
        Driver::Ses
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SignedRequest {
    amz_date: String,
    authorization: String,
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC-SHA-256 can accept any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, service);
    hmac_sha256(&k_service, "aws4_request")
}

fn amz_timestamps(now: OffsetDateTime) -> (String, String) {
    let date = format!("{:04}{:02}{:02}", now.year(), u8::from(now.month()), now.day());
    let amz_date = format!("{date}T{:02}{:02}{:02}Z", now.hour(), now.minute(), now.second());
    (date, amz_date)
}

fn sign_request(
    credentials: &SesCredentials,
    region: &str,
    host: &str,
    path: &str,
    body: &[u8],
    now: OffsetDateTime,
) -> SignedRequest {
    let (date, amz_date) = amz_timestamps(now);

    let mut headers = vec![
        ("content-type", "application/json".to_string()),
        ("host", host.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &credentials.token {
        headers.push(("x-amz-security-token", token.clone()));
    }

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}",
        sha256_hex(body)
    );

    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(&credentials.secret, &date, region, SERVICE);
    let signature = hex(&hmac_sha256(&key, &string_to_sign));

    SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            credentials.key
        ),
        amz_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn credentials() -> SesCredentials {
        SesCredentials {
            key: "AKIDEXAMPLE".into(),
            secret: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            token: None,
        }
    }

    #[test]
    fn derives_documented_signing_key() {
        // Published AWS example for 20120215/us-east-1/iam.
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex(&key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn authorization_header_shape() {
        let signed = sign_request(
            &credentials(),
            "eu-west-1",
            "email.eu-west-1.amazonaws.com",
            SEND_EMAIL_PATH,
            b"{}",
            datetime!(2024-03-05 07:08:09 UTC),
        );

        assert_eq!(signed.amz_date, "20240305T070809Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240305/eu-west-1/ses/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, Signature="
        ));
        let signature = signed.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn static_credentials_need_key_and_secret() {
        let config = TransportConfig {
            key: Some("AKIDEXAMPLE".into()),
            secret: Some(String::new()),
            ..TransportConfig::new("ses")
        };
        let ses = SesTransport::from_config(&config).unwrap();

        assert_eq!(ses.region(), DEFAULT_SES_REGION);
        assert!(ses.credentials().is_none());
    }
}
