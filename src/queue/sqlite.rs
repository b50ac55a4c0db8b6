use super::WorkQueue;
use crate::db::Pool;
use crate::error::QueueError;
use crate::model::QueueJob;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

/// Durable queue backed by the `queue_items` table.
///
/// Pop is a single `DELETE … RETURNING` statement, so two consumers can never
/// claim the same row. Waiting is done by polling every `poll_interval` until
/// the pop timeout elapses.
#[derive(Clone)]
pub struct SqliteQueue {
    pool: Pool,
    pop_timeout: Duration,
    poll_interval: Duration,
}

impl SqliteQueue {
    pub fn new(pool: Pool, pop_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            pool,
            pop_timeout,
            poll_interval,
        }
    }

    async fn try_take(&self, queues: &[&str]) -> Result<Option<String>, QueueError> {
        if queues.is_empty() {
            return Ok(None);
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "DELETE FROM queue_items WHERE id = (SELECT id FROM queue_items WHERE queue IN (",
        );
        let mut names = qb.separated(", ");
        for q in queues {
            names.push_bind(*q);
        }
        names.push_unseparated(") ORDER BY id LIMIT 1) RETURNING payload");
        let payload = qb
            .build_query_scalar::<String>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(payload)
    }
}

#[async_trait]
impl WorkQueue for SqliteQueue {
    #[instrument(skip_all, fields(queue = queue, job_id = job.job_id))]
    async fn push(&self, queue: &str, mut job: QueueJob) -> Result<(), QueueError> {
        job.created_at = Utc::now();
        let payload = serde_json::to_string(&job)?;
        sqlx::query("INSERT INTO queue_items (queue, payload, enqueued_at) VALUES (?, ?, ?)")
            .bind(queue)
            .bind(payload)
            .bind(job.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pop_any(&self, queues: &[&str]) -> Result<Option<QueueJob>, QueueError> {
        let deadline = Instant::now() + self.pop_timeout;
        loop {
            if let Some(raw) = self.try_take(queues).await? {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_items WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
