//! Environment-backed configuration and the runtime settings store.
//!
//! [`EnvConfig`] deserializes any `serde` type straight from environment
//! variables. [`Settings`] is the mutable key-value store the mailer reads its
//! `email.*` keys from, with a [`secure_get`](Settings::secure_get) path for
//! secret-bearing values.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::crypto::{self, CryptoError, EncryptionKey};

pub use config::ConfigError;

/// Marker prefix for values stored through [`Settings::put_secure`].
pub const ENCRYPTED_PREFIX: &str = "encrypted:";

/// Separator for nested keys in environment variables (`NOTIFIER_EMAIL__HOST`).
const NESTED_SEPARATOR: &str = "__";

pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
    /// Like [`from_env_with_prefix`](EnvConfig::from_env_with_prefix), treating `__` as a nesting separator.
    fn from_env_nested(prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        let c = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        c.try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let c = config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?;
        c.try_deserialize()
    }

    fn from_env_nested(prefix: &str) -> Result<Self, ConfigError> {
        let c = config::Config::builder()
            .add_source(nested_environment(prefix))
            .build()?;
        c.try_deserialize()
    }
}

fn nested_environment(prefix: &str) -> config::Environment {
    config::Environment::with_prefix(prefix)
        .prefix_separator("_")
        .separator(NESTED_SEPARATOR)
        .try_parsing(true)
}

/// Shared, mutable settings tree addressed by dotted keys (`email.from.address`).
///
/// Clones share the same tree, so a change made through one handle is visible
/// to every other.
#[derive(Clone, Default)]
pub struct Settings {
    tree: Arc<RwLock<Value>>,
    key: Option<EncryptionKey>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("secure", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Wrap an existing JSON tree. Non-object roots are replaced by an empty object.
    pub fn from_value(value: Value) -> Self {
        let root = match value {
            Value::Object(_) => value,
            _ => Value::Object(Map::new()),
        };
        Self {
            tree: Arc::new(RwLock::new(root)),
            key: None,
        }
    }

    /// Load settings from `<PREFIX>_*` environment variables (and `.env`).
    ///
    /// `NOTIFIER_EMAIL__DRIVER=smtp` becomes `email.driver = "smtp"`. A
    /// top-level `encryption_key` (base64) enables the secure lookup.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let c = config::Config::builder()
            .add_source(nested_environment(prefix))
            .build()?;
        Self::from_config(c)
    }

    /// Load settings from a file in any format the `config` crate understands.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let c = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;
        Self::from_config(c)
    }

    fn from_config(c: config::Config) -> Result<Self, ConfigError> {
        let mut value: Value = c.try_deserialize()?;

        let key = match value.as_object_mut().and_then(|o| o.remove("encryption_key")) {
            Some(Value::String(encoded)) => Some(
                EncryptionKey::try_from_base64(&encoded)
                    .map_err(|e| ConfigError::Message(format!("encryption_key: {e}")))?,
            ),
            _ => None,
        };

        let mut settings = Self::from_value(value);
        settings.key = key;
        Ok(settings)
    }

    /// Enable [`secure_get`](Settings::secure_get) and [`put_secure`](Settings::put_secure).
    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        lookup(&tree, key).filter(|v| !v.is_null()).cloned()
    }

    /// Deserialize the value at `key`; `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key).map(serde_json::from_value).transpose()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_to_string)
    }

    /// Truthiness of a flag, accepting `true`, `1`, `"true"` and `"1"`.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(default),
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes" | "on"),
            _ => default,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        insert(&mut tree, key, value.into());
    }

    pub fn forget(&self, key: &str) {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        let (parent, leaf) = match key.rsplit_once('.') {
            Some((parent, leaf)) => (lookup_mut(&mut tree, parent), leaf),
            None => (Some(&mut *tree), key),
        };
        if let Some(Value::Object(map)) = parent {
            map.remove(leaf);
        }
    }

    /// Encrypt `value` and store it at `key`.
    pub async fn put_secure(&self, key: &str, value: impl Into<String>) -> Result<(), CryptoError> {
        let enc_key = self.key.clone().ok_or(CryptoError::MissingKey)?;
        let sealed = crypto::seal_base64(enc_key, value.into()).await?;
        self.put(key, format!("{ENCRYPTED_PREFIX}{sealed}"));
        Ok(())
    }

    /// Read a secret-bearing value.
    ///
    /// Values written by [`put_secure`](Settings::put_secure) are decrypted;
    /// plain values (e.g. injected through the environment) are returned as is.
    pub async fn secure_get(&self, key: &str) -> Result<Option<String>, CryptoError> {
        let Some(raw) = self.get_string(key) else {
            return Ok(None);
        };

        match raw.strip_prefix(ENCRYPTED_PREFIX) {
            Some(sealed) => {
                let enc_key = self.key.clone().ok_or(CryptoError::MissingKey)?;
                crypto::open_base64(enc_key, sealed).await.map(Some)
            }
            None => Ok(Some(raw)),
        }
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |node, segment| node.get(segment))
}

fn lookup_mut<'a>(root: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    key.split('.')
        .try_fold(root, |node, segment| node.get_mut(segment))
}

fn insert(root: &mut Value, key: &str, value: Value) {
    let mut node = root;
    let mut segments = key.split('.').peekable();

    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            unreachable!("node was just made an object");
        };

        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_keys_read_nested_values() {
        let settings = Settings::from_value(json!({
            "email": { "driver": "smtp", "from": { "address": "hello@example.com" } }
        }));

        assert_eq!(settings.get_string("email.driver").as_deref(), Some("smtp"));
        assert_eq!(
            settings.get_string("email.from.address").as_deref(),
            Some("hello@example.com")
        );
        assert!(settings.get("email.from.name").is_none());
    }

    #[test]
    fn put_creates_intermediate_objects() {
        let settings = Settings::new();
        settings.put("email.from.address", "a@b.com");
        settings.put("email.port", 587);

        assert_eq!(settings.get("email.port"), Some(json!(587)));
        assert_eq!(settings.get("email.from"), Some(json!({ "address": "a@b.com" })));
    }

    #[test]
    fn put_overwrites_scalars_on_the_path() {
        let settings = Settings::new();
        settings.put("email", "scalar");
        settings.put("email.driver", "log");

        assert_eq!(settings.get_string("email.driver").as_deref(), Some("log"));
    }

    #[test]
    fn forget_removes_leaf() {
        let settings = Settings::from_value(json!({ "email": { "driver": "smtp", "host": "h" } }));
        settings.forget("email.driver");

        assert!(!settings.has("email.driver"));
        assert!(settings.has("email.host"));
    }

    #[test]
    fn bool_flags_accept_strings_and_numbers() {
        let settings = Settings::from_value(json!({ "a": "true", "b": 0, "c": true, "d": "no" }));

        assert!(settings.get_bool("a", false));
        assert!(!settings.get_bool("b", true));
        assert!(settings.get_bool("c", false));
        assert!(!settings.get_bool("d", true));
        assert!(settings.get_bool("missing", true));
    }

    #[test]
    fn clones_share_the_tree() {
        let settings = Settings::new();
        let other = settings.clone();
        other.put("email.queue", true);

        assert!(settings.get_bool("email.queue", false));
    }
}
