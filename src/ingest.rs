use crate::db;
use crate::error::{PipelineError, QueueError};
use crate::model::{Job, NewJob, QueueJob, TranscriptionPayload};
use crate::queue::QueueService;
use tracing::{info, instrument};

/// Audio already stored on disk, ready to enter the pipeline.
#[derive(Debug, Clone)]
pub struct AudioSubmission {
    pub user_id: i64,
    pub audio_path: String,
    pub file_name: String,
    pub duration_secs: f64,
}

/// Create the job record and enqueue its transcription stage.
///
/// The returned job reflects the row as created; by the time the caller sees
/// it the status in the store is already `queued`.
#[instrument(skip_all, fields(user_id = submission.user_id))]
pub async fn submit_audio(
    queue: &QueueService,
    submission: AudioSubmission,
) -> Result<Job, PipelineError> {
    let job = db::create_job(
        queue.pool(),
        NewJob {
            user_id: submission.user_id,
            audio_file_path: submission.audio_path.clone(),
            file_name: submission.file_name,
            duration_secs: submission.duration_secs,
        },
    )
    .await?;

    let first = QueueJob::new(
        job.id,
        job.user_id,
        &TranscriptionPayload {
            audio_path: submission.audio_path,
        },
    )
    .map_err(QueueError::from)?;
    queue.push_job(first).await?;
    info!(job_id = job.id, "audio submitted");
    Ok(job)
}
