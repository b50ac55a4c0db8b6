use super::WorkQueue;
use crate::error::QueueError;
use crate::model::QueueJob;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Default)]
struct Lanes {
    next_seq: u64,
    // Items are kept serialized, the same shape a broker would hold.
    by_name: HashMap<String, VecDeque<(u64, String)>>,
}

/// Process-local queue. Contents do not survive a restart.
pub struct MemoryQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
    pop_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(pop_timeout: Duration) -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            pop_timeout,
        }
    }

    async fn take_oldest(&self, queues: &[&str]) -> Option<String> {
        let mut lanes = self.lanes.lock().await;
        let name = queues
            .iter()
            .filter_map(|q| {
                lanes
                    .by_name
                    .get(*q)
                    .and_then(|lane| lane.front())
                    .map(|(seq, _)| (*seq, *q))
            })
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, q)| q)?;
        lanes
            .by_name
            .get_mut(name)
            .and_then(|lane| lane.pop_front())
            .map(|(_, raw)| raw)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, queue: &str, mut job: QueueJob) -> Result<(), QueueError> {
        job.created_at = Utc::now();
        let raw = serde_json::to_string(&job)?;
        {
            let mut lanes = self.lanes.lock().await;
            let seq = lanes.next_seq;
            lanes.next_seq += 1;
            lanes
                .by_name
                .entry(queue.to_string())
                .or_default()
                .push_back((seq, raw));
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_any(&self, queues: &[&str]) -> Result<Option<QueueJob>, QueueError> {
        let deadline = Instant::now() + self.pop_timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(raw) = self.take_oldest(queues).await {
                return Ok(Some(serde_json::from_str(&raw)?));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn size(&self, queue: &str) -> Result<u64, QueueError> {
        let lanes = self.lanes.lock().await;
        Ok(lanes.by_name.get(queue).map_or(0, |lane| lane.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobType, SummarizationPayload, TranscriptionPayload};
    use std::sync::Arc;

    fn transcription(job_id: i64) -> QueueJob {
        QueueJob::new(
            job_id,
            1,
            &TranscriptionPayload {
                audio_path: format!("{job_id}.ogg"),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let q = MemoryQueue::new(Duration::from_millis(50));
        for id in 1..=5 {
            q.push("transcription", transcription(id)).await.unwrap();
        }
        assert_eq!(q.size("transcription").await.unwrap(), 5);
        for id in 1..=5 {
            let job = q.pop("transcription").await.unwrap().unwrap();
            assert_eq!(job.job_id, id);
        }
        assert_eq!(q.size("transcription").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_pop_times_out_with_none() {
        let q = MemoryQueue::new(Duration::from_millis(30));
        let started = std::time::Instant::now();
        assert!(q.pop("transcription").await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(q.size("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_any_returns_oldest_across_queues() {
        let q = MemoryQueue::new(Duration::from_millis(50));
        q.push("summarization", {
            QueueJob::new(
                1,
                1,
                &SummarizationPayload {
                    transcription: "t".into(),
                },
            )
            .unwrap()
        })
        .await
        .unwrap();
        q.push("transcription", transcription(2)).await.unwrap();

        let first = q
            .pop_any(&["transcription", "summarization"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.job_type, JobType::Summarization);
        let second = q
            .pop_any(&["transcription", "summarization"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.job_id, 2);
        // Queues not listed are left alone.
        q.push("other", transcription(3)).await.unwrap();
        assert!(q.pop_any(&["transcription"]).await.unwrap().is_none());
        assert_eq!(q.size("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blocked_pop_wakes_on_push() {
        let q = Arc::new(MemoryQueue::new(Duration::from_secs(5)));
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.pop("transcription").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("transcription", transcription(9)).await.unwrap();

        let popped = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should wake before its own timeout")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(popped.job_id, 9);
    }
}
