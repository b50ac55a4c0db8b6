//! Row models returned by repository queries.
//!
//! Statuses are stored as text; conversion into `crate::model` entities is the
//! only place where a bad value in the database surfaces as an error.

use crate::error::StoreError;
use crate::model::{Job, JobStatus, User};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub user_id: i64,
    pub status: String,
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

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;
        Ok(Job {
            id: row.id,
            user_id: row.user_id,
            status,
            audio_file_path: row.audio_file_path,
            file_name: row.file_name,
            duration_secs: row.duration_secs,
            transcription: row.transcription,
            summary: row.summary,
            notion_page_id: row.notion_page_id,
            notion_database_id: row.notion_database_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub tg_user_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub notion_token: Option<String>,
    pub notion_database_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            tg_user_id: row.tg_user_id,
            username: row.username,
            full_name: row.full_name,
            notion_token: row.notion_token,
            notion_database_id: row.notion_database_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
