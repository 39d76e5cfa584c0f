use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single published message: the bus itself is payload-agnostic — callers
/// pick the encoding (bincode for RPC bodies, JSON for REST-adjacent
/// payloads) and carry it as opaque bytes here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Header key carrying the trace/correlation id so a subscriber can thread
/// logging spans back to the originating request without parsing the payload.
pub const TRACE_ID_HEADER: &str = "trace-id";

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self { subject: subject.into(), payload, headers: HashMap::new() }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.headers.insert(TRACE_ID_HEADER.to_string(), trace_id.into());
        self
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.headers.get(TRACE_ID_HEADER).map(String::as_str)
    }
}
