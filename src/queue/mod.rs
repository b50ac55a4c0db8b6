//! Work queue: named FIFO channels of serialized `QueueJob`s with a bounded
//! blocking pop.
//!
//! - `memory`: process-local backend.
//! - `sqlite`: `queue_items` table in the application database.
//! - `service`: `QueueService`, which keeps job statuses in step with queue activity.
//!
//! The queue is not a source of truth. An item popped but not fully handled is
//! gone; job state lives in the job store.

pub mod memory;
pub mod service;
pub mod sqlite;

use crate::error::QueueError;
use crate::model::QueueJob;
use async_trait::async_trait;

pub use memory::MemoryQueue;
pub use service::QueueService;
pub use sqlite::SqliteQueue;

/// Queue name polled by the worker in addition to the per-type queues.
pub const DEFAULT_QUEUE: &str = "default";

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append `job` to `queue`, stamping its `created_at`.
    async fn push(&self, queue: &str, job: QueueJob) -> Result<(), QueueError>;

    /// Wait up to the backend's pop timeout for the oldest item of `queue`.
    /// `Ok(None)` means the timeout elapsed with nothing available.
    async fn pop(&self, queue: &str) -> Result<Option<QueueJob>, QueueError> {
        self.pop_any(&[queue]).await
    }

    /// Like `pop`, across several queues: the earliest-pushed item among them wins.
    async fn pop_any(&self, queues: &[&str]) -> Result<Option<QueueJob>, QueueError>;

    async fn size(&self, queue: &str) -> Result<u64, QueueError>;
}
