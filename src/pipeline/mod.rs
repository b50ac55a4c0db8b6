//! Stage handlers of the voice-note pipeline:
//! transcription → summarization → note sync → notification.
//!
//! Stages never call each other. Each one finishes by pushing the next stage's
//! queue job through the `QueueService`.

pub mod note_sync;
pub mod notification;
pub mod summarization;
pub mod transcription;

use crate::audio::Transcoder;
use crate::error::{PipelineError, QueueError};
use crate::model::{QueueJob, StagePayload};
use crate::notify::Notifier;
use crate::notion::NotionService;
use crate::queue::QueueService;
use crate::summarize::Summarizer;
use crate::transcribe::Transcriber;
use crate::worker::HandlerRegistry;
use std::sync::Arc;

pub use note_sync::NoteSyncStage;
pub use notification::{format_completion_message, NotificationStage};
pub use summarization::SummarizationStage;
pub use transcription::TranscriptionStage;

/// External services the stages call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub transcoder: Arc<dyn Transcoder>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn Summarizer>,
    pub notion: Arc<dyn NotionService>,
    pub notifier: Arc<dyn Notifier>,
}

/// Register all four stages.
pub fn register_stages(
    registry: &mut HandlerRegistry,
    queue: &QueueService,
    collaborators: &Collaborators,
) {
    registry
        .register(TranscriptionStage::new(
            queue.clone(),
            collaborators.transcoder.clone(),
            collaborators.transcriber.clone(),
        ))
        .register(SummarizationStage::new(
            queue.clone(),
            collaborators.summarizer.clone(),
        ))
        .register(NoteSyncStage::new(queue.clone(), collaborators.notion.clone()))
        .register(NotificationStage::new(
            queue.pool().clone(),
            collaborators.notifier.clone(),
        ));
}

/// Queue job for the next stage of the same job.
fn next_stage<P: StagePayload>(job: &QueueJob, payload: &P) -> Result<QueueJob, PipelineError> {
    QueueJob::new(job.job_id, job.user_id, payload)
        .map_err(|e| PipelineError::Queue(QueueError::Codec(e)))
}

/// Collaborator output that is blank counts as a failed call.
fn non_blank(service: &'static str, value: String) -> Result<String, PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::collaborator(
            service,
            anyhow::anyhow!("empty result"),
        ));
    }
    Ok(value)
}
