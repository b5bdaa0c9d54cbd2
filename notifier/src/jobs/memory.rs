use async_trait::async_trait;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::entry::{JobEntry, JobStatus};
use super::traits::QueueProvider;
use super::JobError;

/// In-memory [`QueueProvider`] for development and testing.
///
/// Jobs are stored in insertion order behind a mutex, so claiming is FIFO per
/// queue. Not durable: all jobs are lost on restart.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    entries: Arc<Mutex<Vec<JobEntry>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, in insertion order.
    pub async fn entries(&self) -> Vec<JobEntry> {
        self.entries.lock().await.clone()
    }

    /// Number of entries still waiting to run.
    pub async fn pending(&self) -> usize {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|e| e.status == JobStatus::Pending)
            .count()
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError> {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
    ) -> Result<Option<JobEntry>, JobError> {
        let mut entries = self.entries.lock().await;
        let now = OffsetDateTime::now_utc();

        let pos = entries.iter().position(|e| {
            e.status == JobStatus::Pending
                && e.run_at <= now
                && (queues.is_empty() || queues.iter().any(|q| *q == e.queue))
        });

        if let Some(idx) = pos {
            let entry = &mut entries[idx];
            entry.status = JobStatus::Running;
            entry.locked_at = Some(now);
            entry.locked_by = Some(worker_id.to_string());
            entry.attempts += 1;
            Ok(Some(entry.clone()))
        } else {
            Ok(None)
        }
    }

    async fn update(&self, entry: &JobEntry) -> Result<(), JobError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry.clone();
        }
        Ok(())
    }
}
