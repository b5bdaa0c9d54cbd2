use notifier::config::{Settings, ENCRYPTED_PREFIX};
use notifier::crypto::{decrypt, encrypt, open_base64, seal_base64, CryptoError, EncryptionKey};

fn test_key() -> EncryptionKey {
    EncryptionKey::try_from(&[0u8; 32][..]).unwrap()
}

fn another_test_key() -> EncryptionKey {
    EncryptionKey::try_from(&[1u8; 32][..]).unwrap()
}

#[tokio::test]
async fn encryption_roundtrip() {
    let key = test_key();
    let plaintext = "secret message";

    let ciphertext = encrypt(key.clone(), plaintext.to_string()).await.unwrap();
    let decrypted = decrypt(key, ciphertext).await.unwrap();

    assert_eq!(decrypted, plaintext);
}

#[tokio::test]
async fn wrong_key_fails_decryption() {
    let ciphertext = encrypt(test_key(), "secret".to_string()).await.unwrap();

    assert!(decrypt(another_test_key(), ciphertext).await.is_err());
}

#[tokio::test]
async fn tampered_ciphertext_fails() {
    let key = test_key();

    let mut ciphertext = encrypt(key.clone(), "secret".to_string()).await.unwrap();
    ciphertext[0] ^= 1; // Flip a bit

    assert!(decrypt(key, ciphertext).await.is_err());
}

#[tokio::test]
async fn base64_roundtrip() {
    let key = test_key();

    let sealed = seal_base64(key.clone(), "api-key-123".to_string()).await.unwrap();
    assert_ne!(sealed, "api-key-123");
    assert_eq!(open_base64(key, &sealed).await.unwrap(), "api-key-123");
}

#[tokio::test]
async fn secure_settings_roundtrip() {
    let settings = Settings::new().with_encryption_key(test_key());

    settings.put_secure("email.secret", "key-abc").await.unwrap();

    let stored = settings.get_string("email.secret").unwrap();
    assert!(stored.starts_with(ENCRYPTED_PREFIX));
    assert!(!stored.contains("key-abc"));
    assert_eq!(
        settings.secure_get("email.secret").await.unwrap().as_deref(),
        Some("key-abc")
    );
}

#[tokio::test]
async fn plain_values_pass_through_secure_lookup() {
    let settings = Settings::new();
    settings.put("email.password", 123456);

    assert_eq!(
        settings.secure_get("email.password").await.unwrap().as_deref(),
        Some("123456")
    );
    assert_eq!(settings.secure_get("email.missing").await.unwrap(), None);
}

#[tokio::test]
async fn encrypted_value_without_key_is_an_error() {
    let writer = Settings::new().with_encryption_key(test_key());
    writer.put_secure("email.password", "hunter2").await.unwrap();

    let reader = Settings::new();
    reader.put("email.password", writer.get_string("email.password").unwrap());

    assert!(matches!(
        reader.secure_get("email.password").await,
        Err(CryptoError::MissingKey)
    ));
}
