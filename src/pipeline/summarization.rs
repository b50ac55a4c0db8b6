use super::{next_stage, non_blank};
use crate::db;
use crate::error::PipelineError;
use crate::model::{JobStatus, NoteSyncPayload, QueueJob, SummarizationPayload};
use crate::queue::QueueService;
use crate::summarize::Summarizer;
use crate::worker::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct SummarizationStage {
    queue: QueueService,
    summarizer: Arc<dyn Summarizer>,
}

impl SummarizationStage {
    pub fn new(queue: QueueService, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { queue, summarizer }
    }
}

#[async_trait]
impl Stage for SummarizationStage {
    type Payload = SummarizationPayload;

    async fn run(&self, job: &QueueJob, payload: SummarizationPayload) -> Result<(), PipelineError> {
        let summary = self
            .summarizer
            .summarize(&payload.transcription)
            .await
            .map_err(|e| PipelineError::collaborator("summarizer", e))?;
        let summary = non_blank("summarizer", summary)?;

        let pool = self.queue.pool();
        db::set_summary(pool, job.job_id, &summary).await?;
        let next = NoteSyncPayload {
            transcription: payload.transcription,
            summary,
        };
        self.queue.push_job(next_stage(job, &next)?).await?;
        db::update_job_status(pool, job.job_id, JobStatus::Summarized, None).await?;
        info!(job_id = job.job_id, "summary stored");
        Ok(())
    }
}
