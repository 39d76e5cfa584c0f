use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// Default ceiling on `NackTask` retries before a task is dead-lettered
/// (Open Question (b) in spec.md §9: "treat as config, default 5").
pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub payload: Vec<u8>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub visibility_deadline: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        module_name: impl Into<String>,
        payload: Vec<u8>,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            module_name: module_name.into(),
            payload,
            scheduled_at,
            created_at: now,
            status: TaskStatus::Pending,
            visibility_deadline: None,
            retry_count: 0,
        }
    }
}
