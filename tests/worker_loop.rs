use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tg_voicenotes::db;
use tg_voicenotes::error::PipelineError;
use tg_voicenotes::model::{JobStatus, JobType, NewJob, QueueJob, SummarizationPayload};
use tg_voicenotes::queue::{QueueService, SqliteQueue, WorkQueue};
use tg_voicenotes::worker::{HandlerRegistry, Stage, WorkerSettings};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

async fn setup() -> (sqlx::SqlitePool, QueueService) {
    setup_with_pop_timeout(Duration::from_millis(20)).await
}

async fn setup_with_pop_timeout(pop_timeout: Duration) -> (sqlx::SqlitePool, QueueService) {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let queue: Arc<dyn WorkQueue> = Arc::new(SqliteQueue::new(
        pool.clone(),
        pop_timeout,
        Duration::from_millis(5),
    ));
    let service = QueueService::new(queue, pool.clone());
    (pool, service)
}

async fn enqueue(pool: &sqlx::SqlitePool, service: &QueueService, text: &str) -> i64 {
    let user_id = db::get_or_create_user(pool, 1, None, None).await.unwrap();
    let job = db::create_job(
        pool,
        NewJob {
            user_id,
            audio_file_path: "a.ogg".into(),
            file_name: "a.ogg".into(),
            duration_secs: 1.0,
        },
    )
    .await
    .unwrap();
    service
        .push_job(
            QueueJob::new(
                job.id,
                user_id,
                &SummarizationPayload {
                    transcription: text.into(),
                },
            )
            .unwrap(),
        )
        .await
        .unwrap();
    job.id
}

fn settings(concurrency: usize) -> WorkerSettings {
    WorkerSettings {
        idle_sleep: Duration::from_millis(5),
        concurrency,
        fail_jobs_on_error: true,
    }
}

/// Sleeps inside `run` and tracks how many runs overlap.
#[derive(Clone, Default)]
struct SlowStage {
    started: Arc<Notify>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Stage for SlowStage {
    type Payload = SummarizationPayload;

    async fn run(&self, _job: &QueueJob, payload: Self::Payload) -> Result<(), PipelineError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().await.push(payload.transcription);
        Ok(())
    }
}

async fn wait_finished(stage: &SlowStage, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while stage.finished.lock().await.len() < n {
        assert!(tokio::time::Instant::now() < deadline, "stage did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn stop_waits_for_in_flight_handler() {
    let (pool, service) = setup().await;
    let stage = SlowStage::default();
    let mut registry = HandlerRegistry::new();
    registry.register(stage.clone());

    enqueue(&pool, &service, "first").await;
    let worker = service.start_worker(registry, settings(1), CancellationToken::new());
    stage.started.notified().await;
    worker.stop().await;

    assert_eq!(*stage.finished.lock().await, vec!["first".to_string()]);
    assert_eq!(stage.running.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_permit_runs_jobs_one_at_a_time() {
    let (pool, service) = setup().await;
    let stage = SlowStage::default();
    let mut registry = HandlerRegistry::new();
    registry.register(stage.clone());

    enqueue(&pool, &service, "a").await;
    enqueue(&pool, &service, "b").await;
    let worker = service.start_worker(registry, settings(1), CancellationToken::new());
    wait_finished(&stage, 2).await;
    worker.stop().await;

    assert_eq!(stage.peak.load(Ordering::SeqCst), 1);
    assert_eq!(*stage.finished.lock().await, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn extra_permits_let_handlers_overlap() {
    let (pool, service) = setup().await;
    let stage = SlowStage::default();
    let mut registry = HandlerRegistry::new();
    registry.register(stage.clone());

    enqueue(&pool, &service, "a").await;
    enqueue(&pool, &service, "b").await;
    let worker = service.start_worker(registry, settings(2), CancellationToken::new());
    wait_finished(&stage, 2).await;
    worker.stop().await;

    assert_eq!(stage.peak.load(Ordering::SeqCst), 2);
}

struct Panicking;

#[async_trait::async_trait]
impl Stage for Panicking {
    type Payload = SummarizationPayload;

    async fn run(&self, _job: &QueueJob, payload: Self::Payload) -> Result<(), PipelineError> {
        if payload.transcription == "boom" {
            panic!("stage blew up");
        }
        Ok(())
    }
}

#[tokio::test]
async fn panicking_handler_fails_job_and_worker_survives() {
    let (pool, service) = setup().await;
    let mut registry = HandlerRegistry::new();
    registry.register(Panicking);

    let boom = enqueue(&pool, &service, "boom").await;
    let fine = enqueue(&pool, &service, "fine").await;
    let worker = service.start_worker(registry, settings(1), CancellationToken::new());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let failed = db::get_job(&pool, boom).await.unwrap();
        let ok = db::get_job(&pool, fine).await.unwrap();
        // No stage moves `fine` forward, so processing is as far as it gets.
        if failed.status == JobStatus::Failed && ok.status == JobStatus::Processing {
            assert_eq!(
                failed.error_message.as_deref(),
                Some("summarization handler panicked")
            );
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs never settled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.stop().await;
}

#[tokio::test]
async fn cancelling_the_token_ends_the_loop() {
    let (pool, service) = setup().await;
    let stage = SlowStage::default();
    let mut registry = HandlerRegistry::new();
    registry.register(stage.clone());

    let cancel = CancellationToken::new();
    let worker = service.start_worker(registry, settings(1), cancel.clone());
    cancel.cancel();
    worker.stop().await;

    // Items pushed after shutdown stay queued.
    let job_id = enqueue(&pool, &service, "late").await;
    assert_eq!(service.queue_size(JobType::Summarization.queue_name()).await.unwrap(), 1);
    assert_eq!(
        db::get_job(&pool, job_id).await.unwrap().status,
        JobStatus::Queued
    );
    assert!(stage.finished.lock().await.is_empty());
}

#[tokio::test]
async fn stop_does_not_wait_out_a_blocked_pop() {
    let (_pool, service) = setup_with_pop_timeout(Duration::from_secs(30)).await;
    let mut registry = HandlerRegistry::new();
    registry.register(SlowStage::default());

    let worker = service.start_worker(registry, settings(1), CancellationToken::new());
    // Let the loop enter its pop on an empty queue.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(2), worker.stop())
        .await
        .expect("stop waited for the pop timeout");
    assert!(started.elapsed() < Duration::from_secs(2));
}
