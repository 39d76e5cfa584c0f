use chrono::Utc;
use imn_bus::{subject, BusMessage};
use imn_model::{RunningNotice, StateSymbol};
use imn_store::SetModuleStateRequest;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::AppState;

/// Subscribes to the agent's versionless `running` broadcast and performs
/// the authoritative, versioned DBOS write (DESIGN.md Open Question (a):
/// both mechanisms exist — this is the consumer of the live one, feeding
/// the durable one).
pub async fn spawn_running_consumer(state: AppState) {
    let handler_state = state.clone();
    state
        .bus
        .subscribe(subject::MODULE_STATE, Box::new(move |msg| on_running_notice(handler_state.clone(), msg)))
        .await;
    info!(subject = subject::MODULE_STATE, "running-state consumer online");
}

fn on_running_notice(state: AppState, msg: BusMessage) {
    let Ok(notice) = bincode::deserialize::<RunningNotice>(&msg.payload) else { return };
    tokio::spawn(async move { apply(&state, notice).await });
}

async fn apply(state: &AppState, notice: RunningNotice) {
    let ctx = CancellationToken::new();
    let req = SetModuleStateRequest {
        request_id: notice.request_id.clone(),
        agent_id: notice.agent_id,
        module_name: notice.module_name,
        state: StateSymbol::Running,
        error_message: String::new(),
        details: Default::default(),
    };
    // Best-effort: a terminal or already-running record rejects this as an
    // invalid transition, which just means we lost the race with the
    // out/error message — not an error worth surfacing.
    if let Err(e) = state.dbos.set_module_state(req, Utc::now(), &ctx).await {
        warn!(request_id = %notice.request_id, error = %e, "running-state transition skipped");
    }
}
