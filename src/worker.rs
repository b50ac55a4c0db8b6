//! Handler registry and the worker loop that drains the work queue.
//!
//! A `Stage` works on its own payload type. The registry wraps each stage in an
//! adapter that decodes the raw queue payload first, so a malformed item turns
//! into `PipelineError::Payload` before any stage code runs.

use crate::error::PipelineError;
use crate::model::{JobType, QueueJob, StagePayload};
use crate::queue::{QueueService, DEFAULT_QUEUE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// One pipeline step, typed by the payload it consumes.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    type Payload: StagePayload;

    async fn run(&self, job: &QueueJob, payload: Self::Payload) -> Result<(), PipelineError>;
}

/// Object-safe handler as stored in the registry.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, job: QueueJob) -> Result<(), PipelineError>;
}

struct Typed<S>(S);

#[async_trait]
impl<S: Stage> StageHandler for Typed<S> {
    async fn handle(&self, job: QueueJob) -> Result<(), PipelineError> {
        let job_type = <S::Payload as StagePayload>::JOB_TYPE;
        let payload: S::Payload = serde_json::from_value(job.payload.clone())
            .map_err(|e| PipelineError::payload(job_type, e.to_string()))?;
        payload
            .validate()
            .map_err(|reason| PipelineError::payload(job_type, reason))?;
        self.0.run(&job, payload).await
    }
}

/// Job type → handler. Built before the worker starts and read-only afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: Stage>(&mut self, stage: S) -> &mut Self {
        let job_type = <S::Payload as StagePayload>::JOB_TYPE;
        self.register_handler(job_type, Arc::new(Typed(stage)))
    }

    /// Registering a job type twice replaces the earlier handler.
    pub fn register_handler(
        &mut self,
        job_type: JobType,
        handler: Arc<dyn StageHandler>,
    ) -> &mut Self {
        if self.handlers.insert(job_type, handler).is_some() {
            warn!(job_type = %job_type, "handler registered twice; keeping the last one");
        }
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// Registered job types in pipeline order.
    pub fn job_types(&self) -> Vec<JobType> {
        JobType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    /// Queues the worker polls: one per registered type, then `default`.
    pub fn queue_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.job_types().iter().map(|t| t.queue_name()).collect();
        names.push(DEFAULT_QUEUE);
        names
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub idle_sleep: Duration,
    pub concurrency: usize,
    pub fail_jobs_on_error: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(1),
            concurrency: 1,
            fail_jobs_on_error: true,
        }
    }
}

impl From<&crate::config::Worker> for WorkerSettings {
    fn from(cfg: &crate::config::Worker) -> Self {
        Self {
            idle_sleep: Duration::from_millis(cfg.idle_sleep_ms),
            concurrency: cfg.concurrency,
            fail_jobs_on_error: cfg.fail_jobs_on_error,
        }
    }
}

/// Running worker. Dropping it leaves the loop running until the token is
/// cancelled elsewhere.
pub struct WorkerHandle {
    cancel: CancellationToken,
    tracker: TaskTracker,
    poller: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop and wait for in-flight handlers to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.poller.await {
            error!(?err, "worker loop ended abnormally");
        }
        self.tracker.close();
        self.tracker.wait().await;
        info!("worker stopped");
    }
}

pub(crate) fn spawn(
    service: QueueService,
    registry: HandlerRegistry,
    settings: WorkerSettings,
    cancel: CancellationToken,
) -> WorkerHandle {
    let tracker = TaskTracker::new();
    let poller = tokio::spawn(run_loop(
        service,
        Arc::new(registry),
        settings,
        cancel.clone(),
        tracker.clone(),
    ));
    WorkerHandle {
        cancel,
        tracker,
        poller,
    }
}

async fn run_loop(
    service: QueueService,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let queues = registry.queue_names();
    let permits = Arc::new(Semaphore::new(settings.concurrency.max(1)));

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        // Cancellation aborts a blocked pop; at worst an item is lost, as with a crash.
        let popped = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            popped = service.pop_job_any(&queues) => popped,
        };
        let job = match popped {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                idle(&cancel, settings.idle_sleep).await;
                continue;
            }
            Err(err) => {
                drop(permit);
                error!(error = %err, "failed to pop from work queue");
                idle(&cancel, settings.idle_sleep).await;
                continue;
            }
        };

        let Some(handler) = registry.get(job.job_type) else {
            warn!(
                job_id = job.job_id,
                job_type = %job.job_type,
                "no handler registered; dropping queue job"
            );
            continue;
        };

        let service = service.clone();
        let fail_jobs_on_error = settings.fail_jobs_on_error;
        tracker.spawn(async move {
            let _permit = permit;
            dispatch(&service, handler, job, fail_jobs_on_error).await;
        });
    }
    debug!("worker loop exited");
}

async fn idle(cancel: &CancellationToken, sleep: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(sleep) => {}
    }
}

async fn dispatch(
    service: &QueueService,
    handler: Arc<dyn StageHandler>,
    job: QueueJob,
    fail_jobs_on_error: bool,
) {
    let job_id = job.job_id;
    let job_type = job.job_type;
    let started = Instant::now();

    // Run in its own task so a panicking handler is reported like an error.
    let outcome = tokio::spawn(async move { handler.handle(job).await }).await;
    let message = match outcome {
        Ok(Ok(())) => {
            info!(
                job_id,
                job_type = %job_type,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "queue job handled"
            );
            return;
        }
        Ok(Err(err)) => {
            error!(job_id, job_type = %job_type, error = %err, "handler failed; dropping queue job");
            err.to_string()
        }
        Err(join_err) => {
            error!(job_id, job_type = %job_type, ?join_err, "handler panicked; dropping queue job");
            format!("{job_type} handler panicked")
        }
    };

    if fail_jobs_on_error && job_type.tracks_status() {
        if let Err(err) = service.mark_failed(job_id, &message).await {
            warn!(job_id, error = %err, "could not mark job failed");
        }
    }
}
