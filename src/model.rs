use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline status of a job as persisted in the `jobs` table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Queued,
    Processing,
    Transcribed,
    Summarized,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Transcribed => "transcribed",
            JobStatus::Summarized => "summarized",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "transcribed" => Ok(JobStatus::Transcribed),
            "summarized" => Ok(JobStatus::Summarized),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Tag selecting the stage handler for a queue job. Also names the queue the
/// job is published to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcription,
    Summarization,
    NoteSync,
    Notification,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Transcription,
        JobType::Summarization,
        JobType::NoteSync,
        JobType::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Transcription => "transcription",
            JobType::Summarization => "summarization",
            JobType::NoteSync => "note_sync",
            JobType::Notification => "notification",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        self.as_str()
    }

    /// Whether pushing/popping this kind of queue job moves the owning job
    /// through `queued`/`processing`. Notifications run after the job is
    /// already terminal and must leave its status alone.
    pub fn tracks_status(&self) -> bool {
        !matches!(self, JobType::Notification)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub tg_user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub notion_token: Option<String>,
    pub notion_database_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token + target database for a user's Notion integration.
#[derive(Clone, PartialEq, Eq)]
pub struct NotionCredentials {
    pub token: String,
    pub database_id: String,
}

impl fmt::Debug for NotionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionCredentials")
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl User {
    /// Both token and database id must be present for the integration to count
    /// as configured.
    pub fn notion_credentials(&self) -> Option<NotionCredentials> {
        let token = self.notion_token.as_deref().map(str::trim).unwrap_or("");
        let database_id = self
            .notion_database_id
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        if token.is_empty() || database_id.is_empty() {
            return None;
        }
        Some(NotionCredentials {
            token: token.to_string(),
            database_id: database_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub user_id: i64,
    pub status: JobStatus,
    pub audio_file_path: String,
    pub file_name: String,
    pub duration_secs: f64,
    pub transcription: Option<String>,
    pub summary: Option<String>,
    pub notion_page_id: Option<String>,
    pub notion_database_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for `db::create_job`; everything else is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: i64,
    pub audio_file_path: String,
    pub file_name: String,
    pub duration_secs: f64,
}

/// Unit of work carried by the work queue. The payload stays raw JSON until the
/// handler for `job_type` decodes it into its own payload struct.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueJob {
    pub job_id: i64,
    pub user_id: i64,
    pub job_type: JobType,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl QueueJob {
    pub fn new<P: StagePayload>(
        job_id: i64,
        user_id: i64,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            job_id,
            user_id,
            job_type: P::JOB_TYPE,
            created_at: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Typed payload of one pipeline stage.
pub trait StagePayload: Serialize + DeserializeOwned + Send + 'static {
    const JOB_TYPE: JobType;

    /// Reject payloads that decode but are missing required content.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptionPayload {
    pub audio_path: String,
}

impl StagePayload for TranscriptionPayload {
    const JOB_TYPE: JobType = JobType::Transcription;

    fn validate(&self) -> Result<(), String> {
        non_empty("audio_path", &self.audio_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummarizationPayload {
    pub transcription: String,
}

impl StagePayload for SummarizationPayload {
    const JOB_TYPE: JobType = JobType::Summarization;

    fn validate(&self) -> Result<(), String> {
        non_empty("transcription", &self.transcription)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteSyncPayload {
    pub transcription: String,
    pub summary: String,
}

impl StagePayload for NoteSyncPayload {
    const JOB_TYPE: JobType = JobType::NoteSync;

    fn validate(&self) -> Result<(), String> {
        non_empty("transcription", &self.transcription)?;
        non_empty("summary", &self.summary)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub job_id: i64,
}

impl StagePayload for NotificationPayload {
    const JOB_TYPE: JobType = JobType::Notification;
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("field '{field}' is empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_strings_match_serde() {
        for status in [
            JobStatus::Created,
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Transcribed,
            JobStatus::Summarized,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let encoded = serde_json::to_value(status).unwrap();
            assert_eq!(encoded, json!(status.as_str()));
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("pending".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Summarized.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }

    #[test]
    fn queue_job_carries_type_of_payload() {
        let job = QueueJob::new(
            7,
            3,
            &NoteSyncPayload {
                transcription: "t".into(),
                summary: "s".into(),
            },
        )
        .unwrap();
        assert_eq!(job.job_type, JobType::NoteSync);
        assert_eq!(job.payload["summary"], "s");

        let wire = serde_json::to_value(&job).unwrap();
        assert_eq!(wire["job_type"], "note_sync");
    }

    #[test]
    fn payload_validation_rejects_blank_fields() {
        let p = TranscriptionPayload {
            audio_path: "  ".into(),
        };
        assert!(p.validate().unwrap_err().contains("audio_path"));
        let p = NoteSyncPayload {
            transcription: "x".into(),
            summary: String::new(),
        };
        assert!(p.validate().unwrap_err().contains("summary"));
    }

    #[test]
    fn notion_credentials_require_both_fields() {
        let mut user = User {
            id: 1,
            tg_user_id: 42,
            username: None,
            full_name: None,
            notion_token: Some("secret".into()),
            notion_database_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(user.notion_credentials().is_none());
        user.notion_database_id = Some("db-1".into());
        let creds = user.notion_credentials().unwrap();
        assert_eq!(creds.database_id, "db-1");
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
