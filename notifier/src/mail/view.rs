//! View references and the template registry that renders them.

use std::sync::{Arc, RwLock};

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use super::message::EmailBody;
use super::MailError;

/// Template data. Keys are unique; order is irrelevant.
pub type Data = serde_json::Map<String, serde_json::Value>;

/// Reference to the template(s) an email body is rendered from.
///
/// A bare name renders the HTML body. The structured form names separate
/// HTML and plain-text templates, or carries a literal text body in `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum View {
    Name(String),
    Parts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl View {
    pub fn html(name: impl Into<String>) -> Self {
        View::Parts {
            html: Some(name.into()),
            text: None,
            raw: None,
        }
    }

    pub fn html_and_text(html: impl Into<String>, text: impl Into<String>) -> Self {
        View::Parts {
            html: Some(html.into()),
            text: Some(text.into()),
            raw: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        View::Parts {
            html: None,
            text: Some(name.into()),
            raw: None,
        }
    }

    /// A literal plain-text body, not rendered through any template.
    pub fn raw(body: impl Into<String>) -> Self {
        View::Parts {
            html: None,
            text: None,
            raw: Some(body.into()),
        }
    }
}

impl From<&str> for View {
    fn from(name: &str) -> Self {
        View::Name(name.to_string())
    }
}

impl From<String> for View {
    fn from(name: String) -> Self {
        View::Name(name)
    }
}

/// Registry of named handlebars templates.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Views {
    registry: Arc<RwLock<Handlebars<'static>>>,
}

impl Default for Views {
    fn default() -> Self {
        Self::new()
    }
}

impl Views {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// Register a template under `name`.
    pub fn register(&self, name: &str, source: &str) -> Result<(), MailError> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry
            .register_template_string(name, source)
            .map_err(|e| MailError::View(e.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.has_template(name)
    }

    fn render_template(&self, name: &str, data: &Data) -> Result<String, MailError> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        if !registry.has_template(name) {
            return Err(MailError::View(format!("view [{name}] not found")));
        }
        registry
            .render(name, data)
            .map_err(|e| MailError::View(e.to_string()))
    }

    /// Render a view into an email body.
    pub fn render(&self, view: &View, data: &Data) -> Result<EmailBody, MailError> {
        let (html, text) = match view {
            View::Name(name) => (Some(self.render_template(name, data)?), None),
            View::Parts { html, text, raw } => {
                let html = html
                    .as_deref()
                    .map(|name| self.render_template(name, data))
                    .transpose()?;
                let text = match (text, raw) {
                    (Some(name), _) => Some(self.render_template(name, data)?),
                    (None, Some(raw)) => Some(raw.clone()),
                    (None, None) => None,
                };
                (html, text)
            }
        };

        match (text, html) {
            (Some(text), Some(html)) => Ok(EmailBody::Multipart { text, html }),
            (Some(text), None) => Ok(EmailBody::Text(text)),
            (None, Some(html)) => Ok(EmailBody::Html(html)),
            (None, None) => Err(MailError::View("view names no template".into())),
        }
    }
}
