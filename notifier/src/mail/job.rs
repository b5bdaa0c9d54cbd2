//! The job a queued email travels in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::callback::QueuedCallback;
use super::view::{Data, View};
use super::Mailer;
use crate::jobs::{Job, JobOpts, JobResult};

/// Trait for application state that provides mailer access.
///
/// [`Mailer`] implements it for itself, so the worker context can be the
/// mailer or any app state that carries one:
///
/// ```ignore
/// #[derive(Clone)]
/// pub struct AppState {
///     pub mailer: Mailer,
///     // ...
/// }
///
/// impl HasMailer for AppState {
///     fn mailer(&self) -> &Mailer {
///         &self.mailer
///     }
/// }
/// ```
pub trait HasMailer: Send + Sync + 'static {
    fn mailer(&self) -> &Mailer;
}

impl HasMailer for Mailer {
    fn mailer(&self) -> &Mailer {
        self
    }
}

/// A queued email: view, data and the serialized callback.
///
/// Runs exactly once. Delivery failures are logged by
/// [`Mailer::handle_queued_message`] and the job still completes, so a bad
/// address or a dead relay never turns into a retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendQueuedMail<S = Mailer> {
    pub view: View,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub callback: Option<QueuedCallback>,
    #[serde(skip)]
    _marker: std::marker::PhantomData<S>,
}

impl<S> SendQueuedMail<S> {
    pub fn new(view: View, data: Data, callback: Option<QueuedCallback>) -> Self {
        Self {
            view,
            data,
            callback,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<S: HasMailer> Job for SendQueuedMail<S> {
    const JOB_TYPE: &'static str = "notifier.mail@handle_queued_message";
    type Context = S;

    fn default_opts() -> JobOpts {
        JobOpts {
            max_attempts: 1,
            ..Default::default()
        }
    }

    async fn perform(self, ctx: &Self::Context) -> JobResult {
        let delivered = ctx
            .mailer()
            .handle_queued_message(self.view, self.data, self.callback)
            .await;

        Ok(Some(json!({ "delivered": delivered })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let job = SendQueuedMail::<Mailer>::new(
            View::from("foo.bar"),
            Data::new(),
            Some(QueuedCallback::Identifier("FooMailHandler@foo".into())),
        );

        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({ "view": "foo.bar", "data": {}, "callback": "FooMailHandler@foo" })
        );
    }

    #[test]
    fn runs_once() {
        assert_eq!(SendQueuedMail::<Mailer>::default_opts().max_attempts, 1);
    }
}
