//! Message bodies carried as bus payloads between the coordinator and the
//! agent runtime (spec.md §4.6 "per-module worker loop" / §4.5 dispatch).

use serde::{Deserialize, Serialize};

/// Published by the coordinator to `agent.{id}.in` (or its module-scoped
/// variant) to dispatch one measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInvocation {
    pub request_id: String,
    pub module_name: String,
    pub input: serde_json::Value,
}

/// Published by the agent to `agent.{id}.out` on successful completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInvocationOutcome {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub payload: serde_json::Value,
}

/// Published by the agent to `agent.{id}.error` on handler failure or
/// timeout. `crashed = true` means an unhandled panic was caught by the
/// runtime (the request lands on `failed`); `crashed = false` means the
/// handler itself returned an error (the request lands on `error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInvocationFailure {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub error_message: String,
    pub crashed: bool,
}

/// Lightweight, versionless state notification the agent broadcasts on
/// `agent.module.state` the moment it starts running a handler — ahead of
/// the authoritative, versioned write the coordinator performs against
/// DBOS once it correlates the eventual out/error message. Two mechanisms
/// by design (DESIGN.md Open Question (a)): this one is for live observers
/// wanting low-latency visibility, the DBOS-backed one is the source of
/// truth for `GetModuleState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningNotice {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
}
