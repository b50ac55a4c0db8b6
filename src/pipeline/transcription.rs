use super::{next_stage, non_blank};
use crate::audio::Transcoder;
use crate::db;
use crate::error::PipelineError;
use crate::model::{JobStatus, QueueJob, SummarizationPayload, TranscriptionPayload};
use crate::queue::QueueService;
use crate::transcribe::Transcriber;
use crate::worker::Stage;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct TranscriptionStage {
    queue: QueueService,
    transcoder: Arc<dyn Transcoder>,
    transcriber: Arc<dyn Transcriber>,
}

impl TranscriptionStage {
    pub fn new(
        queue: QueueService,
        transcoder: Arc<dyn Transcoder>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            queue,
            transcoder,
            transcriber,
        }
    }
}

#[async_trait]
impl Stage for TranscriptionStage {
    type Payload = TranscriptionPayload;

    async fn run(&self, job: &QueueJob, payload: TranscriptionPayload) -> Result<(), PipelineError> {
        let source = Path::new(&payload.audio_path);
        info!(job_id = job.job_id, audio = %source.display(), "transcribing");

        let prepared = self
            .transcoder
            .transcode(source)
            .await
            .map_err(|e| PipelineError::collaborator("transcoder", e))?;
        let result = self.transcriber.transcribe(&prepared).await;
        if prepared != source {
            if let Err(err) = tokio::fs::remove_file(&prepared).await {
                warn!(job_id = job.job_id, ?err, file = %prepared.display(), "failed to remove transcoded file");
            }
        }
        let text = result.map_err(|e| PipelineError::collaborator("transcriber", e))?;
        let text = non_blank("transcriber", text)?;

        let pool = self.queue.pool();
        db::set_transcription(pool, job.job_id, &text).await?;
        self.queue
            .push_job(next_stage(job, &SummarizationPayload { transcription: text })?)
            .await?;
        db::update_job_status(pool, job.job_id, JobStatus::Transcribed, None).await?;
        info!(job_id = job.job_id, "transcription stored");
        Ok(())
    }
}
