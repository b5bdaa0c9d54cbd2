//! The dispatcher: renders, addresses and delivers email, or defers it to
//! the job queue.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::callback::{Address, Callback, CallbackRegistry, QueuedCallback};
use super::inliner::{BeforeSending, CssInliner};
use super::job::SendQueuedMail;
use super::message::Email;
use super::transport::{Delivery, HostMailConfig, Transport, TransportManager};
use super::view::{Data, View, Views};
use super::MailError;
use crate::config::Settings;
use crate::jobs::{self, Job, QueueProvider};

/// A mail object that knows how to send and queue itself.
///
/// The mailer hands [`Content::Mailable`] over to these methods and returns
/// their result unchanged.
#[async_trait]
pub trait Mailable: Send + Sync + 'static {
    async fn send(&self, mailer: &Mailer) -> Result<Receipt, MailError>;

    async fn queue(&self, _mailer: &Mailer, _queue: Option<&str>) -> Result<Receipt, MailError> {
        Err(MailError::Serialization("this mailable cannot be queued".into()))
    }

    async fn later(
        &self,
        _mailer: &Mailer,
        _delay: Duration,
        _queue: Option<&str>,
    ) -> Result<Receipt, MailError> {
        Err(MailError::Serialization("this mailable cannot be queued".into()))
    }
}

/// What to send: a view to render, or a self-sending [`Mailable`].
#[derive(Clone)]
pub enum Content {
    View(View),
    Mailable(Arc<dyn Mailable>),
}

impl Content {
    pub fn mailable(mailable: impl Mailable) -> Self {
        Content::Mailable(Arc::new(mailable))
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::View(view) => f.debug_tuple("View").field(view).finish(),
            Content::Mailable(_) => f.write_str("Mailable(..)"),
        }
    }
}

impl From<View> for Content {
    fn from(view: View) -> Self {
        Content::View(view)
    }
}

impl From<&str> for Content {
    fn from(name: &str) -> Self {
        Content::View(View::from(name))
    }
}

impl From<String> for Content {
    fn from(name: String) -> Self {
        Content::View(View::from(name))
    }
}

impl From<Arc<dyn Mailable>> for Content {
    fn from(mailable: Arc<dyn Mailable>) -> Self {
        Content::Mailable(mailable)
    }
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Receipt {
    /// `true` when the email was placed on a queue instead of delivered.
    pub queued: bool,
    /// Id of the queued job.
    pub job_id: Option<Uuid>,
    /// Transport result for direct sends.
    pub delivery: Option<Delivery>,
}

impl Receipt {
    pub fn sent(delivery: Delivery) -> Self {
        Self {
            queued: false,
            job_id: None,
            delivery: Some(delivery),
        }
    }

    pub fn queued(job_id: Uuid) -> Self {
        Self {
            queued: true,
            job_id: Some(job_id),
            delivery: None,
        }
    }
}

/// Sends email through the configured transport, or queues it.
///
/// Cheap to clone; clones share the transport, templates and callbacks. The
/// transport is resolved once, on first use, and reused for the lifetime of
/// the mailer even if the settings change afterwards.
#[derive(Clone)]
pub struct Mailer {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    transports: TransportManager,
    queue: Option<Arc<dyn QueueProvider>>,
    views: Views,
    callbacks: CallbackRegistry,
    filters: Vec<Arc<dyn BeforeSending>>,
    transport: OnceCell<Arc<dyn Transport>>,
    from: RwLock<Option<Address>>,
    to: RwLock<Option<Address>>,
}

/// Builder for [`Mailer`].
pub struct MailerBuilder {
    settings: Settings,
    host: Option<HostMailConfig>,
    queue: Option<Arc<dyn QueueProvider>>,
    views: Views,
    filters: Vec<Arc<dyn BeforeSending>>,
    transport: Option<Arc<dyn Transport>>,
}

impl MailerBuilder {
    /// Queue backend used by `queue`, `later` and `push` when `email.queue` is set.
    pub fn queue(mut self, queue: Arc<dyn QueueProvider>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The host application's mail configuration, used when `email.driver` is unset.
    pub fn host_config(mut self, host: HostMailConfig) -> Self {
        self.host = Some(host);
        self
    }

    pub fn views(mut self, views: Views) -> Self {
        self.views = views;
        self
    }

    /// Add a step run on every email before delivery.
    pub fn filter(mut self, filter: impl BeforeSending) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Drop every before-sending step, including CSS inlining.
    pub fn without_filters(mut self) -> Self {
        self.filters.clear();
        self
    }

    /// Use this transport instead of resolving one from settings.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Mailer {
        let mut transports = TransportManager::new(self.settings.clone());
        if let Some(host) = self.host {
            transports = transports.with_host_config(host);
        }

        let preset = self.transport.is_some();
        let mailer = Mailer {
            inner: Arc::new(Inner {
                settings: self.settings,
                transports,
                queue: self.queue,
                views: self.views,
                callbacks: CallbackRegistry::new(),
                filters: self.filters,
                transport: OnceCell::new_with(self.transport),
                from: RwLock::new(None),
                to: RwLock::new(None),
            }),
        };
        if preset {
            mailer.seed_from();
        }
        mailer
    }
}

impl Mailer {
    /// A mailer reading `email.*` from `settings`, with CSS inlining enabled
    /// and no queue backend.
    pub fn new(settings: Settings) -> Self {
        Self::builder(settings).build()
    }

    pub fn builder(settings: Settings) -> MailerBuilder {
        MailerBuilder {
            settings,
            host: None,
            queue: None,
            views: Views::new(),
            filters: vec![Arc::new(CssInliner)],
            transport: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn transports(&self) -> &TransportManager {
        &self.inner.transports
    }

    /// Template registry used to render views.
    pub fn views(&self) -> &Views {
        &self.inner.views
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    pub fn has_queue(&self) -> bool {
        self.inner.queue.is_some()
    }

    /// Bind an identifier such as `"WelcomeMail@build"` to a callback, so
    /// queued emails naming it can be addressed by the worker.
    pub fn register_callback<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Email) -> Result<(), MailError> + Send + Sync + 'static,
    {
        self.inner.callbacks.register(name, f);
    }

    /// Send every email from this address unless the email sets its own.
    pub fn always_from(&self, address: impl Into<String>, name: Option<&str>) {
        let mut from = self.inner.from.write().unwrap_or_else(|e| e.into_inner());
        *from = Some(Address::new(address, name));
    }

    /// Redirect every email to this single recipient, dropping cc and bcc.
    pub fn always_to(&self, address: impl Into<String>, name: Option<&str>) {
        let mut to = self.inner.to.write().unwrap_or_else(|e| e.into_inner());
        *to = Some(Address::new(address, name));
    }

    /// The transport, resolved on first call and cached afterwards.
    pub async fn transport(&self) -> Result<Arc<dyn Transport>, MailError> {
        self.inner
            .transport
            .get_or_try_init(|| async {
                let transport = self.inner.transports.driver(None).await?;
                self.seed_from();
                tracing::info!(
                    driver = %transport.driver(),
                    fallback = self.inner.transports.using_fallback(),
                    "mail transport ready"
                );
                Ok::<_, MailError>(transport)
            })
            .await
            .cloned()
    }

    /// Take the global sender from settings unless one was set explicitly.
    fn seed_from(&self) {
        let settings = &self.inner.settings;
        let configured = settings
            .get_string("email.from.address")
            .filter(|a| !a.is_empty())
            .map(|address| Address::new(address, settings.get_string("email.from.name").as_deref()))
            .or_else(|| {
                self.inner
                    .transports
                    .host_config()
                    .and_then(|host| host.from.clone())
            });

        if let Some(address) = configured {
            let mut from = self.inner.from.write().unwrap_or_else(|e| e.into_inner());
            from.get_or_insert(address);
        }
    }

    /// Send now, or queue when `email.queue` is true at call time.
    pub async fn push(
        &self,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
        queue: Option<&str>,
    ) -> Result<Receipt, MailError> {
        if self.inner.settings.get_bool("email.queue", false) {
            self.queue(content, data, callback, queue).await
        } else {
            self.send(content, data, callback).await
        }
    }

    /// Render and deliver immediately.
    pub async fn send(
        &self,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
    ) -> Result<Receipt, MailError> {
        let view = match content.into() {
            Content::Mailable(mailable) => return mailable.send(self).await,
            Content::View(view) => view,
        };
        let callback = callback.into();

        let transport = self.transport().await?;
        let mut email = Email::draft(self.inner.views.render(&view, &data)?);

        if let Some(from) = self.global(&self.inner.from) {
            email.from(&from.address, from.name.as_deref());
        }
        callback.apply(&mut email, &self.inner.callbacks)?;
        if let Some(to) = self.global(&self.inner.to) {
            email.to.clear();
            email.cc.clear();
            email.bcc.clear();
            email.to(&to.address, to.name.as_deref());
        }

        for filter in &self.inner.filters {
            filter.before_sending(&mut email)?;
        }

        let delivery = transport.deliver(&email).await?;
        tracing::info!(
            driver = %transport.driver(),
            recipients = email.recipients().count(),
            message_id = ?delivery.message_id,
            "email sent"
        );
        Ok(Receipt::sent(delivery))
    }

    /// Queue for the worker on `queue` (default queue when `None`).
    pub async fn queue(
        &self,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
        queue: Option<&str>,
    ) -> Result<Receipt, MailError> {
        self.defer(content.into(), data, callback.into(), queue, None)
            .await
    }

    /// Queue on a named queue.
    pub async fn on_queue(
        &self,
        queue: &str,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
    ) -> Result<Receipt, MailError> {
        self.queue(content, data, callback, Some(queue)).await
    }

    /// Queue, becoming eligible for delivery after `delay`.
    pub async fn later(
        &self,
        delay: Duration,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
        queue: Option<&str>,
    ) -> Result<Receipt, MailError> {
        self.defer(content.into(), data, callback.into(), queue, Some(delay))
            .await
    }

    pub async fn later_on(
        &self,
        queue: &str,
        delay: Duration,
        content: impl Into<Content>,
        data: Data,
        callback: impl Into<Callback>,
    ) -> Result<Receipt, MailError> {
        self.later(delay, content, data, callback, Some(queue)).await
    }

    async fn defer(
        &self,
        content: Content,
        data: Data,
        callback: Callback,
        queue: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<Receipt, MailError> {
        let view = match content {
            Content::Mailable(mailable) => {
                return match delay {
                    Some(delay) => mailable.later(self, delay, queue).await,
                    None => mailable.queue(self, queue).await,
                };
            }
            Content::View(view) => view,
        };

        let backend = self
            .inner
            .queue
            .as_ref()
            .ok_or(MailError::QueueNotConfigured)?;

        let job = SendQueuedMail::<Mailer>::new(view, data, callback.to_queued()?);
        let mut opts = SendQueuedMail::<Mailer>::default_opts().on_queue(queue);
        if let Some(delay) = delay {
            opts = opts.delay(delay);
        }

        let job_id = jobs::enqueue_with(&**backend, job, opts).await?;
        Ok(Receipt::queued(job_id))
    }

    /// Deliver a queued email. Failures are logged, never returned, so the
    /// job is always acknowledged. Returns whether delivery succeeded.
    pub async fn handle_queued_message(
        &self,
        view: View,
        data: Data,
        callback: Option<QueuedCallback>,
    ) -> bool {
        match self.send(view, data, Callback::from(callback)).await {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(error = %err, "queued email could not be delivered");
                false
            }
        }
    }

    fn global(&self, slot: &RwLock<Option<Address>>) -> Option<Address> {
        slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("resolved", &self.inner.transport.initialized())
            .field("queue", &self.inner.queue.is_some())
            .field("filters", &self.inner.filters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::ArrayTransport;
    use serde_json::json;

    fn mailer(array: &ArrayTransport) -> Mailer {
        let mailer = Mailer::builder(Settings::new())
            .without_filters()
            .transport(Arc::new(array.clone()))
            .build();
        mailer.views().register("hello", "Hello {{name}}").unwrap();
        mailer.always_from("app@example.com", Some("App"));
        mailer
    }

    fn data() -> Data {
        json!({ "name": "Jane" }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn global_from_is_applied_before_callback() {
        let array = ArrayTransport::new();
        let mailer = mailer(&array);

        mailer
            .send(
                View::text("hello"),
                data(),
                Callback::closure(|email| {
                    email.to("jane@example.com", None).subject("Hi");
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let sent = array.messages();
        assert_eq!(sent[0].from.as_deref(), Some("\"App\" <app@example.com>"));
        assert_eq!(sent[0].body.text(), Some("Hello Jane"));
    }

    #[tokio::test]
    async fn callback_can_override_sender() {
        let array = ArrayTransport::new();
        let mailer = mailer(&array);

        mailer
            .send(
                View::text("hello"),
                data(),
                Callback::closure(|email| {
                    email.from("support@example.com", None).to("jane@example.com", None);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(array.messages()[0].from.as_deref(), Some("support@example.com"));
    }

    #[tokio::test]
    async fn global_to_replaces_every_recipient() {
        let array = ArrayTransport::new();
        let mailer = mailer(&array);
        mailer.always_to("staging@example.com", None);

        mailer
            .send(
                View::text("hello"),
                data(),
                Callback::closure(|email| {
                    email.to("jane@example.com", None).bcc("audit@example.com", None);
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let sent = &array.messages()[0];
        assert_eq!(sent.to, vec!["staging@example.com"]);
        assert!(sent.bcc.is_empty());
    }

    #[tokio::test]
    async fn callback_error_aborts_delivery() {
        let array = ArrayTransport::new();
        let mailer = mailer(&array);

        let err = mailer
            .send(View::text("hello"), data(), "Nope@build")
            .await
            .unwrap_err();

        assert!(matches!(err, MailError::UnknownCallback(_)));
        assert!(array.is_empty());
    }
}
