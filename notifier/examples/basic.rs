//! Sends one email directly and one through the queue, using the `log`
//! driver unless `NOTIFIER_EMAIL__DRIVER` says otherwise.
//!
//! ```sh
//! RUST_LOG=info cargo run --example basic
//! NOTIFIER_EMAIL__DRIVER=smtp NOTIFIER_EMAIL__HOST=localhost NOTIFIER_EMAIL__PORT=1025 \
//!     cargo run --example basic
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use notifier::config::Settings;
use notifier::jobs::{JobRegistry, MemoryQueue, Worker};
use notifier::mail::{Composition, Email, Mailer, SendQueuedMail, View};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env_with_prefix("NOTIFIER").context("loading settings")?;
    if !settings.has("email.driver") {
        settings.put("email.driver", "log");
    }
    if !settings.has("email.from.address") {
        settings.put("email.from.address", "hello@example.com");
        settings.put("email.from.name", "Example");
    }

    let queue = Arc::new(MemoryQueue::new());
    let mailer = Mailer::builder(settings).queue(queue.clone()).build();

    mailer.views().register(
        "welcome",
        "<html><head><style>h1 { color: #336; }</style></head>\
         <body><h1>Welcome, {{name}}!</h1></body></html>",
    )?;
    mailer.views().register("welcome.text", "Welcome, {{name}}!")?;
    mailer.register_callback("WelcomeMail@build", |email: &mut Email| {
        email.to("jane@example.com", Some("Jane")).subject("Welcome aboard");
        Ok(())
    });

    let data = json!({ "name": "Jane" })
        .as_object()
        .cloned()
        .unwrap_or_default();

    let receipt = mailer
        .send(
            View::html_and_text("welcome", "welcome.text"),
            data.clone(),
            Composition::new().to("jane@example.com", Some("Jane")).subject("Welcome"),
        )
        .await?;
    tracing::info!(?receipt, "sent directly");

    let receipt = mailer
        .queue(View::html_and_text("welcome", "welcome.text"), data, "WelcomeMail@build", None)
        .await?;
    tracing::info!(job_id = ?receipt.job_id, "queued");

    let registry = JobRegistry::new().register::<SendQueuedMail>();
    let processed = Worker::new(queue, registry, mailer).drain().await?;
    tracing::info!(processed, "queue drained");

    Ok(())
}
