use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::entry::{JobEntry, JobOpts};
use super::JobError;

/// A serializable job with typed execution logic.
///
/// The job's fields become the serialized payload, and `perform` defines the
/// execution logic run by the [`Worker`](super::Worker).
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique identifier for this job type (e.g. `"notifier.mail@handle_queued_message"`).
    const JOB_TYPE: &'static str;

    /// Application state provided at execution time.
    type Context: Send + Sync + 'static;

    /// Default options for this job type. Override to customise.
    fn default_opts() -> JobOpts {
        JobOpts::default()
    }

    /// Execute the job. Return `Ok(Some(value))` to store a result for
    /// observability, or `Ok(None)` when there is nothing to record.
    async fn perform(self, ctx: &Self::Context) -> JobResult;
}

/// Convenience alias for the return type of [`Job::perform`].
pub type JobResult = Result<Option<serde_json::Value>, Box<dyn std::error::Error + Send + Sync>>;

/// Backend-agnostic queue storage.
///
/// The [`Worker`](super::Worker) polls a `QueueProvider`, handles all state
/// transitions (retry, expiry, completion), and calls `update` with the
/// modified entry. The trait is object safe so a mailer can hold any backend
/// behind `Arc<dyn QueueProvider>`.
#[async_trait]
pub trait QueueProvider: Send + Sync + 'static {
    /// Insert a new job entry into the queue.
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError>;

    /// Atomically claim the next eligible job (status=pending, run_at <= now)
    /// from one of `queues`, or from any queue when `queues` is empty.
    ///
    /// The implementation must:
    /// - Select the oldest pending job with `run_at <= now`
    /// - Set `status` to `Running`, `locked_at` to now, `locked_by` to the
    ///   worker id, and increment `attempts`
    /// - Return `None` when no eligible jobs exist
    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
    ) -> Result<Option<JobEntry>, JobError>;

    /// Persist an updated job entry by id.
    async fn update(&self, entry: &JobEntry) -> Result<(), JobError>;
}

#[async_trait]
impl<Q: QueueProvider + ?Sized> QueueProvider for std::sync::Arc<Q> {
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError> {
        (**self).insert(entry).await
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
    ) -> Result<Option<JobEntry>, JobError> {
        (**self).claim_next(worker_id, queues).await
    }

    async fn update(&self, entry: &JobEntry) -> Result<(), JobError> {
        (**self).update(entry).await
    }
}
