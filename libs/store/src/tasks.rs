use std::sync::Arc;

use chrono::{DateTime, Utc};
use imn_kv::KvEngine;
use imn_model::{Task, TaskStatus, DEFAULT_MAX_RETRIES};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::StoreError;

pub const DEFAULT_REQUEUE_JITTER_SECS: i64 = 5;

const PENDING_SET: &str = "tasks:pending";
const INFLIGHT_SET: &str = "tasks:inflight";
const DEAD_LETTER_LIST: &str = "tasks:dead_letter";

fn primary_key(task_id: &str) -> String {
    format!("task:{task_id}")
}

/// Visibility-timeout task queue (spec.md §4.2 "Task queue").
///
/// Tasks live in exactly one of two sorted sets (I4): `tasks:pending`
/// scored by scheduled-at, and `tasks:inflight` scored by visibility
/// deadline. A crash between the remove-then-add of a claim or requeue is
/// recovered by the periodic [`requeue_expired_tasks`] sweep.
pub struct TaskQueue {
    kv: Arc<dyn KvEngine>,
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self { kv }
    }

    async fn read(&self, task_id: &str, ctx: &CancellationToken) -> Result<Task, StoreError> {
        let bytes = self.kv.get(&primary_key(task_id), ctx).await?.ok_or(StoreError::NotFound)?;
        bincode::deserialize(&bytes).map_err(|e| StoreError::Other(e.to_string()))
    }

    async fn write(&self, task: &Task, ctx: &CancellationToken) -> Result<(), StoreError> {
        let bytes = bincode::serialize(task).map_err(|e| StoreError::Other(e.to_string()))?;
        self.kv.set(&primary_key(&task.task_id), bytes, None, ctx).await?;
        Ok(())
    }

    #[instrument(skip(self, task, ctx))]
    pub async fn schedule_task(&self, task: Task, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.write(&task, ctx).await?;
        self.kv.zadd(PENDING_SET, &task.task_id, task.scheduled_at.timestamp() as f64, ctx).await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<Task, StoreError> {
        self.read(task_id, ctx).await
    }

    /// Ranges `tasks:pending` for `score <= now` and atomically (from the
    /// caller's perspective) moves each into `tasks:inflight` with a new
    /// visibility deadline. This is the store-side half of the RPC method
    /// the service table calls `ListDueTasks` — see DESIGN.md for why the
    /// two names refer to the same operation.
    #[instrument(skip(self, ctx))]
    pub async fn claim_due_tasks(&self, now: DateTime<Utc>, visibility_timeout: chrono::Duration, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        let due = self.kv.zrange_by_score(PENDING_SET, f64::MIN, now.timestamp() as f64, ctx).await?;
        let mut claimed = Vec::with_capacity(due.len());
        for member in due {
            let mut task = match self.read(&member.member, ctx).await {
                Ok(t) => t,
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            self.kv.zrem(PENDING_SET, &task.task_id, ctx).await?;
            let deadline = now + visibility_timeout;
            task.status = TaskStatus::InFlight;
            task.visibility_deadline = Some(deadline);
            self.write(&task, ctx).await?;
            self.kv.zadd(INFLIGHT_SET, &task.task_id, deadline.timestamp() as f64, ctx).await?;
            claimed.push(task);
        }
        Ok(claimed)
    }

    #[instrument(skip(self, ctx))]
    pub async fn ack_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.kv.zrem(INFLIGHT_SET, task_id, ctx).await?;
        self.kv.delete(&primary_key(task_id), ctx).await?;
        Ok(())
    }

    /// Re-queues a failed attempt with `retry_delay`, or dead-letters the
    /// task once `max_retries` is exceeded (default 5, spec.md §9 Open
    /// Question (b)).
    #[instrument(skip(self, ctx))]
    pub async fn nack_task(
        &self,
        task_id: &str,
        retry_delay: chrono::Duration,
        now: DateTime<Utc>,
        max_retries: u32,
        ctx: &CancellationToken,
    ) -> Result<Task, StoreError> {
        let mut task = self.read(task_id, ctx).await?;
        self.kv.zrem(INFLIGHT_SET, task_id, ctx).await?;
        task.retry_count += 1;

        if task.retry_count > max_retries {
            task.status = TaskStatus::Failed;
            self.write(&task, ctx).await?;
            let bytes = bincode::serialize(&task).map_err(|e| StoreError::Other(e.to_string()))?;
            self.kv.list_prepend(DEAD_LETTER_LIST, bytes, ctx).await?;
            return Ok(task);
        }

        task.status = TaskStatus::Pending;
        task.visibility_deadline = None;
        self.write(&task, ctx).await?;
        let next_run = now + retry_delay;
        self.kv.zadd(PENDING_SET, task_id, next_run.timestamp() as f64, ctx).await?;
        Ok(task)
    }

    /// Requeues any `tasks:inflight` entry whose visibility deadline has
    /// passed, adding a small jitter to avoid thundering-herd reprocessing.
    #[instrument(skip(self, ctx))]
    pub async fn requeue_expired_tasks(&self, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        let expired = self.kv.zrange_by_score(INFLIGHT_SET, f64::MIN, now.timestamp() as f64, ctx).await?;
        let mut requeued = Vec::with_capacity(expired.len());
        for member in expired {
            let mut task = match self.read(&member.member, ctx).await {
                Ok(t) => t,
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            self.kv.zrem(INFLIGHT_SET, &task.task_id, ctx).await?;
            let jitter = rand::thread_rng().gen_range(0..=DEFAULT_REQUEUE_JITTER_SECS);
            let next_run = now + chrono::Duration::seconds(DEFAULT_REQUEUE_JITTER_SECS + jitter);
            task.status = TaskStatus::Pending;
            task.visibility_deadline = None;
            self.write(&task, ctx).await?;
            self.kv.zadd(PENDING_SET, &task.task_id, next_run.timestamp() as f64, ctx).await?;
            requeued.push(task);
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imn_kv::SledKvEngine;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    fn queue() -> TaskQueue {
        let kv: Arc<dyn KvEngine> = Arc::new(SledKvEngine::temporary().unwrap());
        TaskQueue::new(kv)
    }

    // Scenario 5 (task visibility) from spec.md §8.
    #[tokio::test]
    async fn visibility_timeout_hides_claimed_task_until_it_expires() {
        let queue = queue();
        let now = Utc::now();
        let task = Task::new("t1", "a1", "ping_module", vec![], now, now);
        queue.schedule_task(task, &ctx()).await.unwrap();

        let claimed = queue.claim_due_tasks(now, chrono::Duration::seconds(60), &ctx()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].task_id, "t1");

        let none_yet = queue.claim_due_tasks(now + chrono::Duration::seconds(30), chrono::Duration::seconds(60), &ctx()).await.unwrap();
        assert!(none_yet.is_empty());

        let expired_now = now + chrono::Duration::seconds(70);
        let requeued = queue.requeue_expired_tasks(expired_now, &ctx()).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].retry_count, 0);

        let reclaimed = queue
            .claim_due_tasks(expired_now + chrono::Duration::seconds(DEFAULT_REQUEUE_JITTER_SECS * 2), chrono::Duration::seconds(60), &ctx())
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn nack_reschedules_until_max_retries_then_dead_letters() {
        let queue = queue();
        let now = Utc::now();
        let task = Task::new("t1", "a1", "ping_module", vec![], now, now);
        queue.schedule_task(task, &ctx()).await.unwrap();
        queue.claim_due_tasks(now, chrono::Duration::seconds(60), &ctx()).await.unwrap();

        for attempt in 1..=5 {
            let nacked = queue.nack_task("t1", chrono::Duration::seconds(0), now, 5, &ctx()).await.unwrap();
            assert_eq!(nacked.retry_count, attempt);
            assert_eq!(nacked.status, TaskStatus::Pending);
            queue.claim_due_tasks(now, chrono::Duration::seconds(60), &ctx()).await.unwrap();
        }

        let dead_lettered = queue.nack_task("t1", chrono::Duration::seconds(0), now, 5, &ctx()).await.unwrap();
        assert_eq!(dead_lettered.status, TaskStatus::Failed);
        assert_eq!(dead_lettered.retry_count, 6);
    }

    #[tokio::test]
    async fn ack_removes_task_entirely() {
        let queue = queue();
        let now = Utc::now();
        let task = Task::new("t1", "a1", "ping_module", vec![], now, now);
        queue.schedule_task(task, &ctx()).await.unwrap();
        queue.claim_due_tasks(now, chrono::Duration::seconds(60), &ctx()).await.unwrap();
        queue.ack_task("t1", &ctx()).await.unwrap();
        assert!(matches!(queue.get_task("t1", &ctx()).await.unwrap_err(), StoreError::NotFound));
    }
}
