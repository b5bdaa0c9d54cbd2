use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::Instrument;

use super::entry::{JobEntry, JobStatus};
use super::registry::JobRegistry;
use super::traits::QueueProvider;
use super::JobError;

/// Generic job processor that polls any [`QueueProvider`] and dispatches
/// to handlers registered in a [`JobRegistry`].
///
/// The worker owns all state-transition logic: on success it marks the entry
/// completed, on failure it decides whether to retry (with backoff) or mark
/// permanently failed, and it checks expiry before dispatching.
///
/// ```ignore
/// let registry = JobRegistry::new().register::<SendQueuedMail>();
///
/// Worker::new(queue, registry, mailer)
///     .queues(["emails"])
///     .concurrency(8)
///     .start();
/// ```
pub struct Worker<Q: QueueProvider, S: Send + Sync + 'static> {
    queue: Arc<Q>,
    registry: Arc<JobRegistry<S>>,
    ctx: Arc<S>,
    queues: Arc<Vec<String>>,
    concurrency: usize,
    poll_interval: Duration,
    worker_id: String,
}

impl<Q: QueueProvider, S: Send + Sync + 'static> Worker<Q, S> {
    pub fn new(queue: Q, registry: JobRegistry<S>, ctx: S) -> Self {
        Self {
            queue: Arc::new(queue),
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            queues: Arc::new(Vec::new()),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            worker_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Only claim jobs from these named queues (default: all queues).
    pub fn queues<I, T>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.queues = Arc::new(queues.into_iter().map(Into::into).collect());
        self
    }

    /// Maximum number of jobs processed in parallel (default: 4).
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// How often to poll when idle (default: 1s). Backs off slightly during
    /// idle streaks.
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Claim and run a single job on the current task.
    ///
    /// Returns `Ok(false)` when no job was eligible.
    pub async fn process_next(&self) -> Result<bool, JobError> {
        match self.queue.claim_next(&self.worker_id, &self.queues).await? {
            Some(entry) => {
                run_entry(&*self.queue, &self.registry, self.ctx.clone(), entry).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run jobs until none are eligible. Returns how many were processed.
    pub async fn drain(&self) -> Result<usize, JobError> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    /// Start the worker loop. Spawns a background tokio task and returns
    /// immediately.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let Worker {
            queue,
            registry,
            ctx,
            queues,
            concurrency,
            poll_interval,
            worker_id,
        } = self;

        tracing::info!(%worker_id, queues = ?queues, "worker running");

        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
            let mut idle_streak: u32 = 0;

            loop {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let entry = match queue.claim_next(&worker_id, &queues).await {
                    Ok(Some(e)) => e,
                    Ok(None) => {
                        drop(permit);
                        idle_streak = idle_streak.saturating_add(1);
                        let backoff = poll_interval
                            .mul_f64((1.5_f64).min(1.0 + idle_streak as f64 * 0.1));
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    Err(e) => {
                        drop(permit);
                        tracing::error!(error = %e, "failed to poll queue");
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };

                idle_streak = 0;

                let queue = queue.clone();
                let registry = registry.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_entry(&*queue, &registry, ctx, entry).await;
                });
            }
        })
    }
}

async fn run_entry<Q, S>(queue: &Q, registry: &JobRegistry<S>, ctx: Arc<S>, mut entry: JobEntry)
where
    Q: QueueProvider + ?Sized,
    S: Send + Sync + 'static,
{
    let job_id = entry.id;
    let job_type = entry.job_type.clone();

    if let Some(exp) = entry.expires_at {
        if exp < OffsetDateTime::now_utc() {
            tracing::info!(%job_id, %job_type, "job expired, skipping");
            entry.status = JobStatus::Expired;
            entry.completed_at = Some(OffsetDateTime::now_utc());
            persist(queue, &entry).await;
            return;
        }
    }

    let Some(handler) = registry.get(&job_type).cloned() else {
        tracing::error!(%job_id, %job_type, "no handler registered");
        entry.status = JobStatus::Failed;
        entry.last_error = Some("unknown job type".to_string());
        entry.completed_at = Some(OffsetDateTime::now_utc());
        persist(queue, &entry).await;
        return;
    };

    let span = tracing::info_span!("job", %job_id, %job_type, queue = %entry.queue);
    let result = handler(entry.payload.clone(), ctx).instrument(span).await;

    match result {
        Ok(job_result) => {
            tracing::info!(%job_id, %job_type, "job completed");
            entry.status = JobStatus::Completed;
            entry.result = job_result;
            entry.completed_at = Some(OffsetDateTime::now_utc());
        }
        Err(e) => {
            let error_msg = e.to_string();
            entry.last_error = Some(error_msg.clone());
            entry.locked_at = None;
            entry.locked_by = None;

            if entry.attempts < entry.max_attempts {
                let backoff_secs = (2_u64.saturating_pow(entry.attempts as u32)).min(300);
                entry.status = JobStatus::Pending;
                entry.run_at = OffsetDateTime::now_utc() + Duration::from_secs(backoff_secs);
                tracing::warn!(
                    %job_id, %job_type,
                    attempt = entry.attempts,
                    %error_msg,
                    backoff_secs,
                    "job failed, scheduling retry"
                );
            } else {
                entry.status = JobStatus::Failed;
                entry.completed_at = Some(OffsetDateTime::now_utc());
                tracing::error!(
                    %job_id, %job_type,
                    attempts = entry.attempts,
                    %error_msg,
                    "job permanently failed"
                );
            }
        }
    }

    persist(queue, &entry).await;
}

async fn persist<Q: QueueProvider + ?Sized>(queue: &Q, entry: &JobEntry) {
    if let Err(e) = queue.update(entry).await {
        tracing::error!(job_id = %entry.id, error = %e, "failed to persist job state");
    }
}
