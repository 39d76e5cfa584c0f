use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A point in the per-`request_id` workflow lifecycle.
///
/// `Completed`, `Error`, and `Failed` are terminal (sink) states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSymbol {
    Created,
    Started,
    Running,
    Completed,
    Error,
    Failed,
}

impl StateSymbol {
    pub fn is_terminal(self) -> bool {
        matches!(self, StateSymbol::Completed | StateSymbol::Error | StateSymbol::Failed)
    }

    /// Whether `self -> next` is a legal edge in the transition graph.
    pub fn can_transition_to(self, next: StateSymbol) -> bool {
        use StateSymbol::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Running)
                | (Started, Failed)
                | (Running, Completed)
                | (Running, Error)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for StateSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateSymbol::Created => "created",
            StateSymbol::Started => "started",
            StateSymbol::Running => "running",
            StateSymbol::Completed => "completed",
            StateSymbol::Error => "error",
            StateSymbol::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("illegal transition {from} -> {to} for request {request_id}")]
pub struct InvalidTransition {
    pub request_id: String,
    pub from: StateSymbol,
    pub to: StateSymbol,
}

/// Versioned lifecycle record for a single measurement workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub state: StateSymbol,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

impl ModuleState {
    /// Builds the first (`version = 1`) record for a request, always in the
    /// `Created` state.
    pub fn first(
        request_id: impl Into<String>,
        agent_id: impl Into<String>,
        module_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            agent_id: agent_id.into(),
            module_name: module_name.into(),
            state: StateSymbol::Created,
            error_message: String::new(),
            details: HashMap::new(),
            timestamp: now,
            version: 1,
        }
    }

    /// Validates `self.state -> next` and returns the successor record with
    /// `version = self.version + 1`. Does not mutate `self`; the caller
    /// persists the result. Returns `InvalidTransition` (I2 is preserved:
    /// the store never advances the version on a rejected transition).
    pub fn advance(
        &self,
        next: StateSymbol,
        now: DateTime<Utc>,
        error_message: impl Into<String>,
        details: HashMap<String, String>,
    ) -> Result<Self, InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                request_id: self.request_id.clone(),
                from: self.state,
                to: next,
            });
        }
        Ok(Self {
            request_id: self.request_id.clone(),
            agent_id: self.agent_id.clone(),
            module_name: self.module_name.clone(),
            state: next,
            error_message: error_message.into(),
            details,
            timestamp: now,
            version: self.version + 1,
        })
    }
}

/// Wire body for the `agent.module.state` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleStateBroadcast {
    pub agent_id: String,
    pub module_name: String,
    pub state: StateSymbol,
    pub request_id: String,
    pub timestamp: f64,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
}

impl From<&ModuleState> for ModuleStateBroadcast {
    fn from(s: &ModuleState) -> Self {
        Self {
            agent_id: s.agent_id.clone(),
            module_name: s.module_name.clone(),
            state: s.state,
            request_id: s.request_id.clone(),
            timestamp: s.timestamp.timestamp() as f64,
            version: s.version,
            error_message: if s.error_message.is_empty() { None } else { Some(s.error_message.clone()) },
            details: if s.details.is_empty() { None } else { Some(s.details.clone()) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_chain_completed() {
        let now = Utc::now();
        let created = ModuleState::first("r1", "a1", "echo_module", now);
        assert_eq!(created.version, 1);
        let started = created.advance(StateSymbol::Started, now, "", HashMap::new()).unwrap();
        assert_eq!(started.version, 2);
        let running = started.advance(StateSymbol::Running, now, "", HashMap::new()).unwrap();
        assert_eq!(running.version, 3);
        let completed = running.advance(StateSymbol::Completed, now, "", HashMap::new()).unwrap();
        assert_eq!(completed.version, 4);
        assert!(completed.state.is_terminal());
    }

    #[test]
    fn completed_to_running_is_illegal() {
        let now = Utc::now();
        let completed = ModuleState {
            state: StateSymbol::Completed,
            ..ModuleState::first("r1", "a1", "echo_module", now)
        };
        let err = completed.advance(StateSymbol::Running, now, "", HashMap::new()).unwrap_err();
        assert_eq!(err.from, StateSymbol::Completed);
        assert_eq!(err.to, StateSymbol::Running);
    }

    #[test]
    fn faulty_crash_path_is_error_not_failed() {
        let now = Utc::now();
        let created = ModuleState::first("r1", "a1", "faulty_module", now);
        let started = created.advance(StateSymbol::Started, now, "", HashMap::new()).unwrap();
        let running = started.advance(StateSymbol::Running, now, "", HashMap::new()).unwrap();
        let errored = running.advance(StateSymbol::Error, now, "boom", HashMap::new()).unwrap();
        assert_eq!(errored.state, StateSymbol::Error);
    }

    proptest::proptest! {
        #[test]
        fn version_strictly_increases_on_every_legal_edge(
            seed in 0u8..6,
        ) {
            let now = Utc::now();
            let mut state = ModuleState::first("r1", "a1", "m", now);
            let edges = [
                StateSymbol::Started,
                StateSymbol::Running,
                match seed % 3 {
                    0 => StateSymbol::Completed,
                    1 => StateSymbol::Error,
                    _ => StateSymbol::Failed,
                },
            ];
            for next in edges {
                let prior_version = state.version;
                state = state.advance(next, now, "", HashMap::new()).unwrap();
                prop_assert!(state.version == prior_version + 1);
            }
        }
    }
}
