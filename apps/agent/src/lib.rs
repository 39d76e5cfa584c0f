//! Measurement agent runtime (spec.md C5): loads the fixed module registry,
//! runs one worker loop per module against the shared bus, and emits
//! periodic heartbeats. Has no dependency on `imn-store` — only the
//! coordinator talks to DBOS; the agent only ever publishes and subscribes.

pub mod runtime;

pub use runtime::{AgentRuntime, AgentRuntimeConfig, DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS};
