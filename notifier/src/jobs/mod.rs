//! Background job queue with pluggable backends, retry, and expiry.
//!
//! This is the queue backend queued mail is placed on.
//!
//! # Architecture
//!
//! - [`Job`]: Serializable job trait combining data (payload) with behaviour (`perform`).
//! - [`JobEntry`]: The serialized representation of a queued job. Maps directly to a
//!   database row when using a persistent backend.
//! - [`QueueProvider`]: Backend-agnostic storage trait with named queues.
//! - [`MemoryQueue`]: In-memory provider for development and testing.
//! - [`JobRegistry`]: Maps job type strings to deserialization + execution logic.
//! - [`Worker`]: Generic processor that polls any `QueueProvider` and dispatches jobs.
//!
//! # Quick Start
//!
//! ```ignore
//! // 1. Enqueue (the mailer does this for queued mail)
//! enqueue_with(&queue, job, JobOpts::default().on_queue(Some("emails"))).await?;
//!
//! // 2. Process
//! let registry = JobRegistry::new().register::<SendQueuedMail>();
//! Worker::new(queue, registry, mailer).queues(["emails"]).start();
//! ```

mod entry;
mod memory;
mod registry;
mod traits;
mod worker;

pub use entry::{JobEntry, JobOpts, JobStatus, DEFAULT_QUEUE};
pub use memory::MemoryQueue;
pub use registry::JobRegistry;
pub use traits::{Job, JobResult, QueueProvider};
pub use worker::Worker;

use time::OffsetDateTime;
use uuid::Uuid;

// -------------------------------------------------------------------------
// Errors
// -------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("{0}")]
    Other(String),
}

// -------------------------------------------------------------------------
// Helpers
// -------------------------------------------------------------------------

/// Serialize a [`Job`] into a [`JobEntry`] using its default options.
pub fn into_entry<J: Job>(job: &J) -> Result<JobEntry, JobError> {
    into_entry_with(job, J::default_opts())
}

/// Serialize a [`Job`] into a [`JobEntry`] with explicit options.
pub fn into_entry_with<J: Job>(job: &J, opts: JobOpts) -> Result<JobEntry, JobError> {
    Ok(build_entry(J::JOB_TYPE, serde_json::to_value(job)?, &opts))
}

/// Convenience: serialize a job and insert it into the queue in one call.
pub async fn enqueue<J: Job>(queue: &(impl QueueProvider + ?Sized), job: J) -> Result<Uuid, JobError> {
    enqueue_with(queue, job, J::default_opts()).await
}

/// Convenience: serialize a job with options and insert it into the queue.
pub async fn enqueue_with<J: Job>(
    queue: &(impl QueueProvider + ?Sized),
    job: J,
    opts: JobOpts,
) -> Result<Uuid, JobError> {
    let entry = into_entry_with(&job, opts)?;
    let id = entry.id;
    queue.insert(&entry).await?;
    tracing::debug!(job_id = %id, job_type = J::JOB_TYPE, queue = %entry.queue, "job enqueued");
    Ok(id)
}

/// Build a JobEntry from a pre-serialized payload.
pub(crate) fn build_entry(job_type: &str, payload: serde_json::Value, opts: &JobOpts) -> JobEntry {
    let now = OffsetDateTime::now_utc();
    JobEntry {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        queue: opts
            .queue
            .clone()
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
        payload,
        status: JobStatus::Pending,
        attempts: 0,
        max_attempts: opts.max_attempts,
        run_at: opts.delay.map(|d| now + d).unwrap_or(now),
        expires_at: opts.expires_in.map(|d| now + d),
        locked_at: None,
        locked_by: None,
        last_error: None,
        result: None,
        created_at: now,
        completed_at: None,
    }
}
