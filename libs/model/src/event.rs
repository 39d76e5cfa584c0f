use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowErrored,
    WorkflowFailed,
    Timeout,
    Cancelled,
    AgentRegistered,
    TaskRequeued,
    HandlerCrash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn new(kind: EventKind, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { kind, message: message.into(), metadata: HashMap::new(), timestamp: now }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
