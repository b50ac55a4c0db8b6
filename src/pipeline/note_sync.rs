use super::{next_stage, non_blank};
use crate::db;
use crate::error::PipelineError;
use crate::model::{JobStatus, NoteSyncPayload, NotificationPayload, QueueJob};
use crate::notion::NotionService;
use crate::queue::QueueService;
use crate::worker::Stage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct NoteSyncStage {
    queue: QueueService,
    notion: Arc<dyn NotionService>,
}

impl NoteSyncStage {
    pub fn new(queue: QueueService, notion: Arc<dyn NotionService>) -> Self {
        Self { queue, notion }
    }

    async fn push_notification(&self, job: &QueueJob) {
        let notification = NotificationPayload { job_id: job.job_id };
        let pushed = match next_stage(job, &notification) {
            Ok(qj) => self.queue.push_job(qj).await,
            Err(err) => Err(err),
        };
        if let Err(err) = pushed {
            warn!(job_id = job.job_id, error = %err, "failed to enqueue completion notification");
        }
    }
}

pub fn page_title(at: DateTime<Utc>) -> String {
    format!("Transcription {}", at.format("%d.%m.%Y %H:%M"))
}

pub fn page_body(summary: &str, transcription: &str) -> String {
    format!(
        "## Summary\n\n{}\n\n## Full transcription\n\n{}",
        summary, transcription
    )
}

#[async_trait]
impl Stage for NoteSyncStage {
    type Payload = NoteSyncPayload;

    async fn run(&self, job: &QueueJob, payload: NoteSyncPayload) -> Result<(), PipelineError> {
        let pool = self.queue.pool();
        let user = db::get_user(pool, job.user_id).await?;

        match user.notion_credentials() {
            None => {
                info!(job_id = job.job_id, user_id = user.id, "no Notion credentials; skipping sync");
            }
            Some(credentials) => {
                let page_id = self
                    .notion
                    .create_page(
                        &credentials,
                        &page_title(Utc::now()),
                        &page_body(&payload.summary, &payload.transcription),
                    )
                    .await
                    .map_err(|e| PipelineError::collaborator("notion", e))?;
                let page_id = non_blank("notion", page_id)?;
                db::set_sync_ids(pool, job.job_id, &page_id, &credentials.database_id).await?;
                info!(job_id = job.job_id, %page_id, "synced to Notion");
            }
        }

        db::update_job_status(pool, job.job_id, JobStatus::Completed, None).await?;
        self.push_notification(job).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn title_carries_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(page_title(at), "Transcription 07.03.2026 09:05");
    }

    #[test]
    fn body_puts_summary_first() {
        let body = page_body("greeting", "hello world");
        assert_eq!(
            body,
            "## Summary\n\ngreeting\n\n## Full transcription\n\nhello world"
        );
    }
}
