use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable measurement result, identified by `(agent_id, request_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub result_id: String,
    pub agent_id: String,
    pub request_id: String,
    pub module_name: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub agent_start_time: DateTime<Utc>,
    pub agent_runtime_version: String,
    pub module_revision: String,
    pub server_id: String,
    pub ingest_source: String,
}

impl MeasurementResult {
    pub fn payload_as_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}
