//! Email message types and their lettre rendering.

use lettre::message::{Mailbox, MultiPart, SinglePart};
use serde::{Deserialize, Serialize};

use super::view::{Data, View};
use super::MailError;

/// The body content of an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EmailBody {
    /// Plain text only.
    Text(String),
    /// HTML only.
    Html(String),
    /// Both plain text and HTML (multipart/alternative).
    Multipart { text: String, html: String },
}

impl EmailBody {
    pub fn html(&self) -> Option<&str> {
        match self {
            EmailBody::Html(html) | EmailBody::Multipart { html, .. } => Some(html),
            EmailBody::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            EmailBody::Text(text) | EmailBody::Multipart { text, .. } => Some(text),
            EmailBody::Html(_) => None,
        }
    }

    /// Mutable access to the HTML part, if any.
    pub fn html_mut(&mut self) -> Option<&mut String> {
        match self {
            EmailBody::Html(html) | EmailBody::Multipart { html, .. } => Some(html),
            EmailBody::Text(_) => None,
        }
    }
}

/// A composed email, ready to hand to a transport.
///
/// The mailer renders the view into `body`; callbacks then fill in the
/// recipients and subject through the mutating helpers (`to`, `subject`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon copy recipients.
    #[serde(default)]
    pub cc: Vec<String>,
    /// Blind carbon copy recipients.
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Email subject line.
    #[serde(default)]
    pub subject: String,
    /// Email body content.
    pub body: EmailBody,
    /// Optional reply-to address.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Sender address. Falls back to the mailer's global "from".
    #[serde(default)]
    pub from: Option<String>,
}

impl Email {
    /// An email with a body and nothing else, the starting point for callbacks.
    pub fn draft(body: EmailBody) -> Self {
        Self {
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body,
            reply_to: None,
            from: None,
        }
    }

    pub fn to(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.to.push(mailbox_string(address, name));
        self
    }

    pub fn cc(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.cc.push(mailbox_string(address, name));
        self
    }

    pub fn bcc(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.bcc.push(mailbox_string(address, name));
        self
    }

    pub fn reply_to(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.reply_to = Some(mailbox_string(address, name));
        self
    }

    pub fn from(&mut self, address: &str, name: Option<&str>) -> &mut Self {
        self.from = Some(mailbox_string(address, name));
        self
    }

    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    /// Every envelope recipient (to, cc and bcc).
    pub fn recipients(&self) -> impl Iterator<Item = &String> {
        self.to.iter().chain(&self.cc).chain(&self.bcc)
    }

    /// Build a lettre [`Message`](lettre::Message) for the wire.
    pub fn to_message(&self) -> Result<lettre::Message, MailError> {
        self.build_message(false)
    }

    /// Like [`to_message`](Self::to_message), but the formatted message
    /// keeps its `Bcc` header for agents that read recipients from headers.
    pub fn to_message_with_bcc(&self) -> Result<lettre::Message, MailError> {
        self.build_message(true)
    }

    fn build_message(&self, keep_bcc: bool) -> Result<lettre::Message, MailError> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| MailError::Build("from address required".into()))?;

        if self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty() {
            return Err(MailError::Build("at least one recipient required".into()));
        }

        let mut builder = lettre::Message::builder().from(parse_mailbox(from)?);

        for to in &self.to {
            builder = builder.to(parse_mailbox(to)?);
        }

        for cc in &self.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        for bcc in &self.bcc {
            builder = builder.bcc(parse_mailbox(bcc)?);
        }

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to)?);
        }

        builder = builder.subject(&self.subject);
        if keep_bcc {
            builder = builder.keep_bcc();
        }

        let message = match &self.body {
            EmailBody::Text(text) => builder.singlepart(SinglePart::plain(text.clone())),
            EmailBody::Html(html) => builder.singlepart(SinglePart::html(html.clone())),
            EmailBody::Multipart { text, html } => {
                builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            }
        }
        .map_err(|e| MailError::Build(e.to_string()))?;

        Ok(message)
    }
}

fn mailbox_string(address: &str, name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("\"{}\" <{}>", name.replace(['"', '\\'], ""), address),
        None => address.to_string(),
    }
}

pub(crate) fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

/// A notification message: a view, its data and an optional subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub view: View,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub subject: Option<String>,
}

impl Message {
    pub fn create(view: impl Into<View>, data: Data, subject: Option<&str>) -> Self {
        Self {
            view: view.into(),
            data,
            subject: subject.map(str::to_string),
        }
    }

    /// The subject, or an empty string when none was given.
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }
}
