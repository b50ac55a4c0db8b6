use crate::db::{self, Pool};
use crate::error::PipelineError;
use crate::model::{Job, NotificationPayload, QueueJob};
use crate::notify::Notifier;
use crate::worker::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

const PREVIEW_CHARS: usize = 500;

pub struct NotificationStage {
    pool: Pool,
    notifier: Arc<dyn Notifier>,
}

impl NotificationStage {
    pub fn new(pool: Pool, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }
}

/// Message sent to the owner once a job has finished.
pub fn format_completion_message(job: &Job) -> String {
    let mut out = String::from("✅ Voice note processed\n\n");

    if let Some(text) = job.transcription.as_deref().filter(|t| !t.is_empty()) {
        out.push_str("📝 Transcription:\n");
        if text.chars().count() > PREVIEW_CHARS {
            out.extend(text.chars().take(PREVIEW_CHARS));
            out.push_str("...");
        } else {
            out.push_str(text);
        }
        out.push_str("\n\n");
    }

    if let Some(summary) = job.summary.as_deref().filter(|s| !s.is_empty()) {
        out.push_str("📊 Summary:\n");
        out.push_str(summary);
        out.push_str("\n\n");
    }

    if job.notion_page_id.as_deref().is_some_and(|p| !p.is_empty()) {
        out.push_str("📎 Saved to Notion\n");
    }
    out
}

#[async_trait]
impl Stage for NotificationStage {
    type Payload = NotificationPayload;

    async fn run(&self, _job: &QueueJob, payload: NotificationPayload) -> Result<(), PipelineError> {
        let record = db::get_job(&self.pool, payload.job_id).await?;
        let user = db::get_user(&self.pool, record.user_id).await?;
        let message = format_completion_message(&record);
        self.notifier
            .notify(user.tg_user_id, &message)
            .await
            .map_err(|e| PipelineError::collaborator("notifier", e))?;
        info!(job_id = record.id, chat_id = user.tg_user_id, "completion notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use chrono::Utc;

    fn job() -> Job {
        Job {
            id: 1,
            user_id: 1,
            status: JobStatus::Completed,
            audio_file_path: "a.ogg".into(),
            file_name: "a.ogg".into(),
            duration_secs: 3.0,
            transcription: Some("hello world".into()),
            summary: Some("greeting".into()),
            notion_page_id: None,
            notion_database_id: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn message_includes_transcription_and_summary() {
        let msg = format_completion_message(&job());
        assert!(msg.contains("📝 Transcription:\nhello world"));
        assert!(msg.contains("📊 Summary:\ngreeting"));
        assert!(!msg.contains("Notion"));
    }

    #[test]
    fn long_transcription_is_truncated_by_chars() {
        let mut j = job();
        j.transcription = Some("ж".repeat(PREVIEW_CHARS + 1));
        j.notion_page_id = Some("page-123".into());
        let msg = format_completion_message(&j);
        let preview = format!("{}...", "ж".repeat(PREVIEW_CHARS));
        assert!(msg.contains(&preview));
        assert!(msg.ends_with("📎 Saved to Notion\n"));
    }
}
