use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use imn_bus::{subject, BusMessage};
use imn_model::{Agent, EventKind, EventLogEntry, HeartbeatMessage};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::AppState;

/// Subscribes once to the heartbeat broadcast (spec.md §4.6 "Heartbeat
/// consumer") and upserts the agent registry on every message. The first
/// time a given agent is seen, it additionally subscribes to that agent's
/// legacy per-agent heartbeat subject (spec.md §4.4), so either form keeps
/// the registry fresh even though only the broadcast form is published.
pub async fn spawn_heartbeat_consumer(state: AppState) {
    let known_legacy = Arc::new(Mutex::new(HashSet::<String>::new()));

    let handler_state = state.clone();
    let handler_known = known_legacy.clone();
    state
        .bus
        .subscribe(
            subject::HEARTBEAT_MODULE,
            Box::new(move |msg| on_heartbeat(handler_state.clone(), handler_known.clone(), msg)),
        )
        .await;

    info!(subject = subject::HEARTBEAT_MODULE, "heartbeat consumer online");
}

fn on_heartbeat(state: AppState, known_legacy: Arc<Mutex<HashSet<String>>>, msg: BusMessage) {
    let Ok(heartbeat) = bincode::deserialize::<HeartbeatMessage>(&msg.payload) else {
        warn!("dropping undecodable heartbeat message");
        return;
    };
    tokio::spawn(async move {
        upsert_agent(&state, &heartbeat).await;
        wire_legacy_subject(&state, known_legacy, heartbeat.agent_id).await;
    });
}

async fn upsert_agent(state: &AppState, heartbeat: &HeartbeatMessage) {
    let ctx = CancellationToken::new();
    let now = Utc::now();
    let seen_at: DateTime<Utc> = Utc.timestamp_opt(heartbeat.timestamp as i64, 0).single().unwrap_or(now);

    match state.dbos.get_agent(&heartbeat.agent_id, &ctx).await {
        Ok(mut agent) => {
            agent.record_heartbeat(seen_at, heartbeat.config.clone());
            if let Err(e) = state.dbos.register_agent(agent, &ctx).await {
                warn!(agent_id = %heartbeat.agent_id, error = %e, "failed to update agent registry");
            }
        }
        Err(_not_found) => {
            let first_seen = Utc.timestamp_opt(heartbeat.first_seen as i64, 0).single().unwrap_or(seen_at);
            let mut agent = Agent::new(heartbeat.agent_id.clone(), heartbeat.hostname.clone(), first_seen);
            agent.record_heartbeat(seen_at, heartbeat.config.clone());
            if let Err(e) = state.dbos.register_agent(agent, &ctx).await {
                warn!(agent_id = %heartbeat.agent_id, error = %e, "failed to register new agent");
                return;
            }
            info!(agent_id = %heartbeat.agent_id, "new agent registered");
            let entry = EventLogEntry::new(EventKind::AgentRegistered, format!("agent {} registered", heartbeat.agent_id), now)
                .with_metadata("agent_id", heartbeat.agent_id.clone());
            let _ = state.dbos.log_event(entry, &ctx).await;
        }
    }
}

async fn wire_legacy_subject(state: &AppState, known_legacy: Arc<Mutex<HashSet<String>>>, agent_id: String) {
    let first_time = {
        let mut known = known_legacy.lock();
        known.insert(agent_id.clone())
    };
    if !first_time {
        return;
    }
    let handler_state = state.clone();
    state
        .bus
        .subscribe(
            &subject::legacy_heartbeat(&agent_id),
            Box::new(move |msg| on_heartbeat(handler_state.clone(), known_legacy.clone(), msg)),
        )
        .await;
}
