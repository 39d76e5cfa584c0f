//! Subject naming conventions for the pub/sub bus (the dotted namespace
//! every agent and coordinator instance publishes and subscribes to).

/// Directed command channel: coordinator -> agent, one module invocation.
pub fn agent_in(agent_id: &str) -> String {
    format!("agent.{agent_id}.in")
}

/// Directed result channel: agent -> coordinator, one module's successful output.
pub fn agent_out(agent_id: &str) -> String {
    format!("agent.{agent_id}.out")
}

/// Directed error channel: agent -> coordinator, one module's failure.
pub fn agent_error(agent_id: &str) -> String {
    format!("agent.{agent_id}.error")
}

/// Module-scoped variant of [`agent_in`], used when an agent wants to
/// subscribe only to invocations of one module rather than all of them.
pub fn agent_module_in(agent_id: &str, module_name: &str) -> String {
    format!("agent.{agent_id}.{module_name}.in")
}

pub fn agent_module_out(agent_id: &str, module_name: &str) -> String {
    format!("agent.{agent_id}.{module_name}.out")
}

pub fn agent_module_error(agent_id: &str, module_name: &str) -> String {
    format!("agent.{agent_id}.{module_name}.error")
}

/// Heartbeat broadcast subject every agent publishes to, coordinator-wide.
pub const HEARTBEAT_MODULE: &str = "agent.heartbeat_module";

/// Legacy per-agent heartbeat subject, still accepted on the consumer side
/// (see DESIGN.md for why both forms are read but only the former is sent).
pub fn legacy_heartbeat(agent_id: &str) -> String {
    format!("heartbeat.{agent_id}")
}

/// Module-state broadcast: every `SetModuleState` call also publishes here,
/// independent of the durable write to DBOS (DESIGN.md Open Question (a)).
pub const MODULE_STATE: &str = "agent.module.state";
