use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default liveness window: an agent is considered alive if it heartbeated
/// within this many seconds of "now".
pub const DEFAULT_LIVENESS_WINDOW_SECS: i64 = 10;

/// A registered measurement agent.
///
/// Agents are never destroyed: one that stops heartbeating is reported dead
/// (`is_alive` recomputed on read) but its record is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub hostname: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub config: HashMap<String, String>,
    pub total_heartbeats: u64,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, hostname: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            hostname: hostname.into(),
            first_seen: now,
            last_seen: now,
            config: HashMap::new(),
            total_heartbeats: 0,
        }
    }

    /// Applies a heartbeat, monotonically advancing `last_seen` and
    /// `total_heartbeats` (P4: liveness monotonicity).
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>, config: HashMap<String, String>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.total_heartbeats += 1;
        self.config = config;
    }

    /// `now - last_seen <= liveness_window`.
    pub fn is_alive(&self, now: DateTime<Utc>, liveness_window_secs: i64) -> bool {
        let age = now.signed_duration_since(self.last_seen);
        age.num_seconds() <= liveness_window_secs
    }
}

/// Wire body for a heartbeat published on `agent.heartbeat_module` (and the
/// legacy `heartbeat.{agent_id}` subject).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub agent_id: String,
    pub hostname: String,
    pub first_seen: f64,
    pub total_heartbeats: u64,
    pub config: HashMap<String, String>,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_within_window() {
        let t0 = Utc::now();
        let agent = Agent::new("a1", "host-1", t0);
        assert!(agent.is_alive(t0 + chrono::Duration::seconds(5), 10));
        assert!(!agent.is_alive(t0 + chrono::Duration::seconds(11), 10));
    }

    #[test]
    fn heartbeat_counter_is_monotonic() {
        let t0 = Utc::now();
        let mut agent = Agent::new("a1", "host-1", t0);
        agent.record_heartbeat(t0 + chrono::Duration::seconds(1), HashMap::new());
        agent.record_heartbeat(t0 + chrono::Duration::seconds(2), HashMap::new());
        assert_eq!(agent.total_heartbeats, 2);
        assert_eq!(agent.last_seen, t0 + chrono::Duration::seconds(2));
    }

    #[test]
    fn stale_heartbeat_does_not_move_last_seen_backwards() {
        let t0 = Utc::now();
        let mut agent = Agent::new("a1", "host-1", t0 + chrono::Duration::seconds(5));
        agent.record_heartbeat(t0, HashMap::new());
        assert_eq!(agent.last_seen, t0 + chrono::Duration::seconds(5));
        assert_eq!(agent.total_heartbeats, 1);
    }
}
