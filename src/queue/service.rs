use super::WorkQueue;
use crate::db::{self, Pool};
use crate::error::PipelineError;
use crate::model::{JobStatus, QueueJob};
use crate::worker::{self, HandlerRegistry, WorkerHandle, WorkerSettings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// The only component that both enqueues work and moves jobs through the
/// queue-facing statuses (`queued`, `processing`).
///
/// There is no transaction spanning the queue and the job store: when the
/// second write fails the first one stays.
#[derive(Clone)]
pub struct QueueService {
    queue: Arc<dyn WorkQueue>,
    pool: Pool,
}

impl QueueService {
    pub fn new(queue: Arc<dyn WorkQueue>, pool: Pool) -> Self {
        Self { queue, pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Publish `job` on the queue named after its type, then mark the owning
    /// job `queued`.
    #[instrument(skip_all, fields(job_id = job.job_id, job_type = %job.job_type))]
    pub async fn push_job(&self, job: QueueJob) -> Result<(), PipelineError> {
        let job_id = job.job_id;
        let job_type = job.job_type;
        self.queue.push(job_type.queue_name(), job).await?;
        if !job_type.tracks_status() {
            return Ok(());
        }
        if let Err(source) = db::update_job_status(&self.pool, job_id, JobStatus::Queued, None).await
        {
            warn!(error = %source, "queue job published but job status not updated");
            return Err(PipelineError::StatusOutOfSync {
                job_id,
                status: JobStatus::Queued,
                source,
            });
        }
        Ok(())
    }

    pub async fn pop_job(&self, queue: &str) -> Result<Option<QueueJob>, PipelineError> {
        self.pop_job_any(&[queue]).await
    }

    /// Pop the oldest item across `queues` and mark its job `processing`.
    /// A failed status update is logged; the item is still handed out.
    pub async fn pop_job_any(&self, queues: &[&str]) -> Result<Option<QueueJob>, PipelineError> {
        let Some(job) = self.queue.pop_any(queues).await? else {
            return Ok(None);
        };
        if job.job_type.tracks_status() {
            if let Err(err) =
                db::update_job_status(&self.pool, job.job_id, JobStatus::Processing, None).await
            {
                warn!(
                    job_id = job.job_id,
                    job_type = %job.job_type,
                    error = %err,
                    "failed to mark job processing"
                );
            }
        }
        Ok(Some(job))
    }

    pub async fn queue_size(&self, queue: &str) -> Result<u64, PipelineError> {
        Ok(self.queue.size(queue).await?)
    }

    pub async fn mark_failed(&self, job_id: i64, message: &str) -> Result<(), PipelineError> {
        db::update_job_status(&self.pool, job_id, JobStatus::Failed, Some(message)).await?;
        Ok(())
    }

    /// Spawn the worker loop and return immediately. The registry is frozen from
    /// here on; cancel `cancel` (or call `WorkerHandle::stop`) to end the loop.
    pub fn start_worker(
        &self,
        registry: HandlerRegistry,
        settings: WorkerSettings,
        cancel: CancellationToken,
    ) -> WorkerHandle {
        info!(
            job_types = ?registry.job_types(),
            concurrency = settings.concurrency,
            "starting worker"
        );
        worker::spawn(self.clone(), registry, settings, cancel)
    }
}
