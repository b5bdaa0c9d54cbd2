//! Pluggable mail transports with direct and queued delivery.
//!
//! - [`mail`]: the [`Mailer`](mail::Mailer) dispatcher, transports and views.
//! - [`jobs`]: the queue queued mail travels through.
//! - [`config`]: environment config and the [`Settings`] store.
//! - [`crypto`]: encryption for secret-bearing settings.

pub mod config;
pub mod crypto;
pub mod jobs;
pub mod mail;

pub use config::{EnvConfig, Settings};
pub use mail::{MailError, Mailer};
