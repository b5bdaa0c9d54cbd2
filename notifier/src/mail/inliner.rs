//! Hooks run on every composed email just before it reaches the transport.

use super::message::Email;
use super::MailError;

/// A step applied to each outgoing email after composition.
pub trait BeforeSending: Send + Sync + 'static {
    fn before_sending(&self, email: &mut Email) -> Result<(), MailError>;
}

/// Rewrites the HTML part of an email so `<style>` rules become inline
/// `style` attributes, which most mail clients require.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssInliner;

impl CssInliner {
    pub fn convert(&self, html: &str) -> Result<String, MailError> {
        css_inline::inline(html).map_err(|e| MailError::Inline(e.to_string()))
    }
}

impl BeforeSending for CssInliner {
    fn before_sending(&self, email: &mut Email) -> Result<(), MailError> {
        if let Some(html) = email.body.html_mut() {
            *html = self.convert(html)?;
        }
        Ok(())
    }
}
