use std::sync::Arc;

use base64::prelude::*;
use orion::aead;

/// Encryption key backing the secure settings lookup
///
/// Exposes helpers to encrypt/decrypt, but opaque
/// to prevent leaking the key through logs or debug output
#[derive(Clone)]
pub struct EncryptionKey(Arc<aead::SecretKey>);

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Base64 error {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Utf8 error {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("No encryption key configured for secure settings")]
    MissingKey,

    #[error("Unknown crypto error")]
    Unknown,
}

impl From<orion::errors::UnknownCryptoError> for CryptoError {
    fn from(_err: orion::errors::UnknownCryptoError) -> Self {
        CryptoError::Unknown
    }
}

impl EncryptionKey {
    pub fn try_from_base64(val: &str) -> Result<EncryptionKey, CryptoError> {
        let bytes = BASE64_STANDARD.decode(val.as_bytes())?;
        EncryptionKey::try_from(&*bytes)
    }

    /// Generate a fresh random key.
    pub fn generate() -> EncryptionKey {
        EncryptionKey(Arc::new(aead::SecretKey::default()))
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key = aead::SecretKey::from_slice(bytes)?;
        Ok(EncryptionKey(Arc::new(key)))
    }
}

/// Encrypts the message using provided key on a blocking thread
///
/// A unique nonce is generated and included in the returned cyphertext
pub async fn encrypt(key: EncryptionKey, msg: String) -> Result<Vec<u8>, CryptoError> {
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CryptoError> {
        let ciphertext = aead::seal(&key.0, msg.as_bytes())?;
        Ok(ciphertext)
    })
    .await
    .map_err(|_| CryptoError::Unknown)?
}

/// Decrypts the ciphertext using provided key on a blocking thread
pub async fn decrypt(key: EncryptionKey, ciphertext: Vec<u8>) -> Result<String, CryptoError> {
    tokio::task::spawn_blocking(move || -> Result<String, CryptoError> {
        let decrypted_data = aead::open(&key.0, &ciphertext)?;
        let msg = String::from_utf8(decrypted_data)?;
        Ok(msg)
    })
    .await
    .map_err(|_| CryptoError::Unknown)?
}

/// Encrypt and encode as base64, the form secure settings are stored in.
pub async fn seal_base64(key: EncryptionKey, msg: String) -> Result<String, CryptoError> {
    let ciphertext = encrypt(key, msg).await?;
    Ok(BASE64_STANDARD.encode(ciphertext))
}

/// Inverse of [`seal_base64`].
pub async fn open_base64(key: EncryptionKey, encoded: &str) -> Result<String, CryptoError> {
    let ciphertext = BASE64_STANDARD.decode(encoded.as_bytes())?;
    decrypt(key, ciphertext).await
}
