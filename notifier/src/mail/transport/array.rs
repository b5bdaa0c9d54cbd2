use std::any::Any;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{message_id, Delivery, Driver, Transport};
use crate::mail::{Email, MailError};

/// Keeps delivered emails in memory. Clones share the same mailbox.
#[derive(Debug, Clone, Default)]
pub struct ArrayTransport {
    messages: Arc<Mutex<Vec<Email>>>,
}

impl ArrayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every email delivered so far, oldest first.
    pub fn messages(&self) -> Vec<Email> {
        self.lock().clone()
    }

    /// Remove and return everything delivered so far.
    pub fn flush(&self) -> Vec<Email> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Email>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for ArrayTransport {
    async fn deliver(&self, email: &Email) -> Result<Delivery, MailError> {
        // Same validation as real transports.
        let message = email.to_message()?;
        self.lock().push(email.clone());
        Ok(Delivery::new(message_id(&message)))
    }

    fn driver(&self) -> Driver {
        Driver::Array
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
