//! Error taxonomy shared by the job store, work queue and stage handlers.
use crate::model::{JobStatus, JobType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("user {0} does not exist")]
    InvalidUser(i64),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn job_not_found(id: i64) -> Self {
        StoreError::NotFound { entity: "job", id }
    }

    pub fn user_not_found(id: i64) -> Self {
        StoreError::NotFound { entity: "user", id }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue job codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("queue transport error: {0}")]
    Transport(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The queue accepted the item but the job row could not be moved to the
    /// matching status. Nothing is rolled back.
    #[error("job {job_id} was enqueued but setting status {status} failed: {source}")]
    StatusOutOfSync {
        job_id: i64,
        status: JobStatus,
        #[source]
        source: StoreError,
    },
    #[error("{service} failed: {source:#}")]
    Collaborator {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid {job_type} payload: {reason}")]
    Payload { job_type: JobType, reason: String },
}

impl PipelineError {
    pub fn collaborator(service: &'static str, source: anyhow::Error) -> Self {
        PipelineError::Collaborator { service, source }
    }

    pub fn payload(job_type: JobType, reason: impl Into<String>) -> Self {
        PipelineError::Payload {
            job_type,
            reason: reason.into(),
        }
    }
}
