use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notifier::config::Settings;
use notifier::jobs::{JobRegistry, JobStatus, MemoryQueue, Worker, DEFAULT_QUEUE};
use notifier::mail::{
    ArrayTransport, Callback, Composition, Content, Data, Email, MailError, Mailable, Mailer,
    Message, Notifier, Receipt, SendQueuedMail, View,
};
use serde_json::json;

fn settings(queue: bool) -> Settings {
    Settings::from_value(json!({
        "email": {
            "driver": "array",
            "queue": queue,
            "from": { "address": "hello@example.com", "name": "Example" },
        }
    }))
}

fn data() -> Data {
    json!({ "name": "Jane" }).as_object().cloned().unwrap()
}

fn mailer(settings: Settings, queue: Option<Arc<MemoryQueue>>) -> Mailer {
    let mut builder = Mailer::builder(settings).without_filters();
    if let Some(queue) = queue {
        builder = builder.queue(queue);
    }
    let mailer = builder.build();
    mailer
        .views()
        .register("welcome", "<p>Welcome {{name}}</p>")
        .unwrap();
    mailer
}

async fn outbox(mailer: &Mailer) -> ArrayTransport {
    let transport = mailer.transport().await.unwrap();
    transport
        .as_any()
        .downcast_ref::<ArrayTransport>()
        .expect("array transport")
        .clone()
}

fn worker(queue: Arc<MemoryQueue>, mailer: Mailer) -> Worker<Arc<MemoryQueue>, Mailer> {
    let registry = JobRegistry::new().register::<SendQueuedMail>();
    Worker::new(queue, registry, mailer)
}

#[tokio::test]
async fn push_sends_directly_when_queue_is_off() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(false), Some(queue.clone()));
    let callback = Composition::new().to("jane@example.com", None).subject("Hi");

    let first = mailer
        .push("welcome", data(), callback.clone(), None)
        .await
        .unwrap();
    let second = mailer.push("welcome", data(), callback, None).await.unwrap();

    assert!(!first.queued);
    assert!(!second.queued);
    assert_eq!(outbox(&mailer).await.len(), 2);
    assert!(queue.entries().await.is_empty());
}

#[tokio::test]
async fn push_queues_when_queue_is_on() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));

    let receipt = mailer
        .push("foo.bar", Data::new(), "FooMailHandler@foo", Some("mail"))
        .await
        .unwrap();

    assert!(receipt.queued);
    let entries = queue.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(Some(entries[0].id), receipt.job_id);
    assert_eq!(entries[0].job_type, "notifier.mail@handle_queued_message");
    assert_eq!(entries[0].queue, "mail");
    assert_eq!(entries[0].max_attempts, 1);
    assert_eq!(
        entries[0].payload,
        json!({ "view": "foo.bar", "data": {}, "callback": "FooMailHandler@foo" })
    );
}

#[tokio::test]
async fn push_reads_the_preference_at_call_time() {
    let queue = Arc::new(MemoryQueue::new());
    let settings = settings(false);
    let mailer = mailer(settings.clone(), Some(queue.clone()));
    let callback = Composition::new().to("jane@example.com", None);

    assert!(!mailer.push("welcome", data(), callback.clone(), None).await.unwrap().queued);
    settings.put("email.queue", true);
    assert!(mailer.push("welcome", data(), callback, None).await.unwrap().queued);
}

#[tokio::test]
async fn queue_without_backend_is_a_configuration_error() {
    let mailer = mailer(settings(true), None);

    let err = mailer
        .push("welcome", data(), "Welcome@build", None)
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::QueueNotConfigured));
    assert!(err.is_configuration());
}

#[tokio::test]
async fn closures_cannot_be_queued() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));

    let err = mailer
        .queue("welcome", data(), Callback::closure(|_| Ok(())), None)
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::Serialization(_)));
    assert!(queue.entries().await.is_empty());
}

#[tokio::test]
async fn named_callback_survives_the_queue() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));
    mailer.register_callback("WelcomeMail@build", |email: &mut Email| {
        email.to("jane@example.com", Some("Jane")).subject("Welcome");
        Ok(())
    });

    mailer
        .queue("welcome", data(), "WelcomeMail@build", None)
        .await
        .unwrap();
    assert_eq!(queue.entries().await[0].payload["callback"], json!("WelcomeMail@build"));

    let processed = worker(queue.clone(), mailer.clone()).drain().await.unwrap();
    assert_eq!(processed, 1);

    let sent = outbox(&mailer).await.messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["\"Jane\" <jane@example.com>"]);
    assert_eq!(sent[0].subject, "Welcome");
    assert_eq!(sent[0].from.as_deref(), Some("\"Example\" <hello@example.com>"));

    let entry = &queue.entries().await[0];
    assert_eq!(entry.status, JobStatus::Completed);
    assert_eq!(entry.result, Some(json!({ "delivered": true })));
}

#[tokio::test]
async fn composition_behaves_the_same_after_the_queue() {
    let composition = Composition::new()
        .to("jane@example.com", None)
        .cc("team@example.com", None)
        .subject("Welcome");

    let direct = mailer(settings(false), None);
    direct
        .send("welcome", data(), composition.clone())
        .await
        .unwrap();

    let queue = Arc::new(MemoryQueue::new());
    let queued = mailer(settings(true), Some(queue.clone()));
    queued
        .queue("welcome", data(), composition, None)
        .await
        .unwrap();
    worker(queue, queued.clone()).drain().await.unwrap();

    assert_eq!(
        outbox(&direct).await.messages(),
        outbox(&queued).await.messages()
    );
}

#[tokio::test]
async fn failed_queued_delivery_is_still_acknowledged() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));

    mailer
        .queue("welcome", data(), "Unregistered@build", None)
        .await
        .unwrap();
    worker(queue.clone(), mailer.clone()).drain().await.unwrap();

    let entry = &queue.entries().await[0];
    assert_eq!(entry.status, JobStatus::Completed);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.result, Some(json!({ "delivered": false })));
    assert!(outbox(&mailer).await.is_empty());
}

#[tokio::test]
async fn later_delays_the_job() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));
    let callback = Composition::new().to("jane@example.com", None);

    mailer
        .later_on("digest", Duration::from_secs(3600), "welcome", data(), callback)
        .await
        .unwrap();

    let entry = &queue.entries().await[0];
    assert_eq!(entry.queue, "digest");
    assert!(entry.run_at > entry.created_at);

    let processed = worker(queue.clone(), mailer).drain().await.unwrap();
    assert_eq!(processed, 0);
}

#[tokio::test]
async fn on_queue_and_default_queue() {
    let queue = Arc::new(MemoryQueue::new());
    let mailer = mailer(settings(true), Some(queue.clone()));

    mailer
        .on_queue("priority", "welcome", data(), "A@b")
        .await
        .unwrap();
    mailer.queue("welcome", data(), "A@b", None).await.unwrap();

    let queues: Vec<String> = queue.entries().await.into_iter().map(|e| e.queue).collect();
    assert_eq!(queues, vec!["priority".to_string(), DEFAULT_QUEUE.to_string()]);
}

#[tokio::test]
async fn transport_is_resolved_once() {
    let settings = settings(false);
    let mailer = mailer(settings.clone(), None);

    let first = mailer.transport().await.unwrap();
    settings.put("email.driver", "log");
    let second = mailer.transport().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn css_is_inlined_by_default() {
    let mailer = Mailer::new(settings(false));
    mailer
        .views()
        .register(
            "styled",
            "<html><head><style>p { color: red; }</style></head><body><p>Hi</p></body></html>",
        )
        .unwrap();

    mailer
        .send(
            View::html("styled"),
            Data::new(),
            Composition::new().to("jane@example.com", None),
        )
        .await
        .unwrap();

    let sent = outbox(&mailer).await.messages();
    assert!(sent[0].body.html().unwrap().contains("style=\""));
}

struct Welcome {
    sends: Arc<AtomicUsize>,
}

#[async_trait]
impl Mailable for Welcome {
    async fn send(&self, _mailer: &Mailer) -> Result<Receipt, MailError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(Receipt::default())
    }

    async fn queue(&self, _mailer: &Mailer, queue: Option<&str>) -> Result<Receipt, MailError> {
        assert_eq!(queue, Some("mailables"));
        Ok(Receipt {
            queued: true,
            ..Receipt::default()
        })
    }
}

#[tokio::test]
async fn mailables_handle_themselves() {
    let sends = Arc::new(AtomicUsize::new(0));
    let mailer = mailer(settings(false), None);

    let receipt = mailer
        .send(
            Content::mailable(Welcome { sends: sends.clone() }),
            Data::new(),
            Callback::None,
        )
        .await
        .unwrap();
    assert_eq!(receipt, Receipt::default());
    assert_eq!(sends.load(Ordering::SeqCst), 1);

    // No queue backend needed: the mailable decides.
    let receipt = mailer
        .queue(
            Content::mailable(Welcome { sends }),
            Data::new(),
            Callback::None,
            Some("mailables"),
        )
        .await
        .unwrap();
    assert!(receipt.queued);
    assert!(outbox(&mailer).await.is_empty());
}

#[tokio::test]
async fn notifier_addresses_the_recipient() {
    let mailer = mailer(settings(false), None);
    let notifier = Notifier::new(mailer.clone());

    let message = Message::create("welcome", data(), Some("Hello there"));
    let receipt = notifier
        .send("jane@example.com", message, Composition::new().cc("team@example.com", None))
        .await
        .unwrap();

    assert!(!receipt.queued);
    let sent = outbox(&mailer).await.messages();
    assert_eq!(sent[0].to, vec!["jane@example.com"]);
    assert_eq!(sent[0].cc, vec!["team@example.com"]);
    assert_eq!(sent[0].subject, "Hello there");
}

#[tokio::test]
async fn notifier_leaves_subject_to_callback_when_empty() {
    let mailer = mailer(settings(false), None);
    let notifier = Notifier::new(mailer.clone());

    notifier
        .send(
            "jane@example.com",
            Message::create("welcome", data(), Some("")),
            Composition::new().subject("From callback"),
        )
        .await
        .unwrap();

    assert_eq!(outbox(&mailer).await.messages()[0].subject, "From callback");
}
