use super::callback::Callback;
use super::mailer::{Mailer, Receipt};
use super::message::Message;
use super::MailError;

/// Someone a notification can be addressed to.
pub trait Recipient {
    fn recipient_email(&self) -> &str;

    fn recipient_name(&self) -> Option<&str> {
        None
    }
}

impl Recipient for str {
    fn recipient_email(&self) -> &str {
        self
    }
}

impl Recipient for String {
    fn recipient_email(&self) -> &str {
        self
    }
}

/// Sends [`Message`]s to [`Recipient`]s through a [`Mailer`], always directly.
#[derive(Debug, Clone)]
pub struct Notifier {
    mailer: Mailer,
}

impl Notifier {
    pub fn new(mailer: Mailer) -> Self {
        Self { mailer }
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    /// Address the message to `user`, set its subject when it has one, then
    /// run `callback`.
    pub async fn send<R>(
        &self,
        user: &R,
        message: Message,
        callback: impl Into<Callback>,
    ) -> Result<Receipt, MailError>
    where
        R: Recipient + ?Sized,
    {
        let address = user.recipient_email().to_string();
        let name = user.recipient_name().map(str::to_string);
        let subject = message.subject.clone().filter(|s| !s.is_empty());
        let callback = callback.into();
        let registry = self.mailer.callbacks().clone();

        let addressed = Callback::closure(move |email| {
            email.to(&address, name.as_deref());
            if let Some(subject) = &subject {
                email.subject(subject.clone());
            }
            callback.apply(email, &registry)
        });

        self.mailer.send(message.view, message.data, addressed).await
    }
}
