//! Recipient-mutation callbacks and their queued form.
//!
//! Callbacks run against the composed [`Email`] before it is handed to the
//! transport. Only data-only callbacks can cross a queue:
//!
//! - [`Callback::Named`]: an identifier such as `"WelcomeMail@build"`,
//!   resolved through the mailer's [`CallbackRegistry`] when invoked.
//! - [`Callback::Compose`]: a [`Composition`] record of recipients and
//!   subject, serialized into an envelope.
//! - [`Callback::Closure`]: arbitrary code, direct sends only.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::message::Email;
use super::MailError;

type CallbackFn = dyn Fn(&mut Email) -> Result<(), MailError> + Send + Sync;

#[derive(Clone, Default)]
pub enum Callback {
    #[default]
    None,
    Named(String),
    Compose(Composition),
    Closure(Arc<CallbackFn>),
}

impl Callback {
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&mut Email) -> Result<(), MailError> + Send + Sync + 'static,
    {
        Callback::Closure(Arc::new(f))
    }

    /// The serializable form placed on a queue.
    pub fn to_queued(&self) -> Result<Option<QueuedCallback>, MailError> {
        match self {
            Callback::None => Ok(None),
            Callback::Named(name) => Ok(Some(QueuedCallback::Identifier(name.clone()))),
            Callback::Compose(composition) => Ok(Some(QueuedCallback::Envelope {
                composition: composition.clone(),
            })),
            Callback::Closure(_) => Err(MailError::Serialization(
                "closures cannot be queued, use a Composition or a named callback".into(),
            )),
        }
    }

    /// Run the callback against `email`, resolving identifiers through `registry`.
    pub fn apply(&self, email: &mut Email, registry: &CallbackRegistry) -> Result<(), MailError> {
        match self {
            Callback::None => Ok(()),
            Callback::Named(name) => registry.invoke(name, email),
            Callback::Compose(composition) => {
                composition.apply(email);
                Ok(())
            }
            Callback::Closure(f) => f(email),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::None => f.write_str("None"),
            Callback::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Callback::Compose(c) => f.debug_tuple("Compose").field(c).finish(),
            Callback::Closure(_) => f.write_str("Closure(..)"),
        }
    }
}

impl From<&str> for Callback {
    fn from(name: &str) -> Self {
        if name.is_empty() {
            Callback::None
        } else {
            Callback::Named(name.to_string())
        }
    }
}

impl From<String> for Callback {
    fn from(name: String) -> Self {
        Callback::from(name.as_str())
    }
}

impl From<Composition> for Callback {
    fn from(composition: Composition) -> Self {
        Callback::Compose(composition)
    }
}

impl From<Option<QueuedCallback>> for Callback {
    fn from(queued: Option<QueuedCallback>) -> Self {
        match queued {
            None => Callback::None,
            Some(QueuedCallback::Identifier(name)) => Callback::from(name),
            Some(QueuedCallback::Envelope { composition }) => Callback::Compose(composition),
        }
    }
}

/// Queued form of a callback: a plain identifier string, or an envelope
/// wrapping a [`Composition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueuedCallback {
    Identifier(String),
    Envelope { composition: Composition },
}

/// Serializable set of mutations applied to a composed email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.to.push(Address::new(address, name));
        self
    }

    pub fn cc(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.cc.push(Address::new(address, name));
        self
    }

    pub fn bcc(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.bcc.push(Address::new(address, name));
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.reply_to = Some(Address::new(address, name));
        self
    }

    pub fn from(mut self, address: impl Into<String>, name: Option<&str>) -> Self {
        self.from = Some(Address::new(address, name));
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn apply(&self, email: &mut Email) {
        for a in &self.to {
            email.to(&a.address, a.name.as_deref());
        }
        for a in &self.cc {
            email.cc(&a.address, a.name.as_deref());
        }
        for a in &self.bcc {
            email.bcc(&a.address, a.name.as_deref());
        }
        if let Some(a) = &self.reply_to {
            email.reply_to(&a.address, a.name.as_deref());
        }
        if let Some(a) = &self.from {
            email.from(&a.address, a.name.as_deref());
        }
        if let Some(subject) = &self.subject {
            email.subject(subject.clone());
        }
    }
}

impl Address {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Named callbacks, looked up by identifier when a [`Callback::Named`] runs.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<CallbackFn>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Email) -> Result<(), MailError> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(name)
    }

    fn invoke(&self, name: &str, email: &mut Email) -> Result<(), MailError> {
        let handler = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(name).cloned()
        };
        match handler {
            Some(f) => f(email),
            None => Err(MailError::UnknownCallback(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::EmailBody;
    use serde_json::json;

    fn draft() -> Email {
        Email::draft(EmailBody::Text("hi".into()))
    }

    #[test]
    fn identifiers_pass_through_unchanged() {
        let queued = Callback::from("FooMailHandler@foo").to_queued().unwrap();
        assert_eq!(serde_json::to_value(&queued).unwrap(), json!("FooMailHandler@foo"));

        let back: Option<QueuedCallback> = serde_json::from_value(json!("FooMailHandler@foo")).unwrap();
        assert!(matches!(Callback::from(back), Callback::Named(n) if n == "FooMailHandler@foo"));
    }

    #[test]
    fn compositions_are_wrapped_in_an_envelope() {
        let composition = Composition::new().to("a@b.com", Some("A")).subject("Hi");
        let queued = Callback::from(composition.clone()).to_queued().unwrap();
        let value = serde_json::to_value(&queued).unwrap();

        assert_eq!(value["composition"]["subject"], json!("Hi"));

        let back: Option<QueuedCallback> = serde_json::from_value(value).unwrap();
        assert!(matches!(Callback::from(back), Callback::Compose(c) if c == composition));
    }

    #[test]
    fn closures_cannot_be_queued() {
        let callback = Callback::closure(|_| Ok(()));
        assert!(matches!(callback.to_queued(), Err(MailError::Serialization(_))));
    }

    #[test]
    fn empty_identifier_is_no_callback() {
        assert!(matches!(Callback::from(""), Callback::None));
        assert_eq!(Callback::None.to_queued().unwrap(), None);
    }

    #[test]
    fn composition_applies_recipients_and_subject() {
        let mut email = draft();
        Composition::new()
            .to("a@b.com", None)
            .bcc("audit@b.com", None)
            .subject("Welcome")
            .apply(&mut email);

        assert_eq!(email.to, vec!["a@b.com"]);
        assert_eq!(email.bcc, vec!["audit@b.com"]);
        assert_eq!(email.subject, "Welcome");
    }

    #[test]
    fn named_callbacks_resolve_through_registry() {
        let registry = CallbackRegistry::new();
        registry.register("Welcome@build", |email: &mut Email| {
            email.to("jane@example.com", None);
            Ok(())
        });

        let mut email = draft();
        Callback::from("Welcome@build").apply(&mut email, &registry).unwrap();
        assert_eq!(email.to, vec!["jane@example.com"]);

        let err = Callback::from("Missing@build")
            .apply(&mut draft(), &registry)
            .unwrap_err();
        assert!(matches!(err, MailError::UnknownCallback(n) if n == "Missing@build"));
    }
}
