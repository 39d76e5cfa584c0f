use chrono::Utc;
use imn_model::{EventKind, EventLogEntry, StateSymbol};
use imn_store::SetModuleStateRequest;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::state::AppState;

/// Failure recovery on restart (spec.md §4.6): force-fail module-states
/// stuck in `{started, running}` past the recovery window, then requeue
/// any tasks orphaned by the previous process.
pub async fn run_recovery(state: &AppState) {
    let ctx = CancellationToken::new();
    let now = Utc::now();

    let agents = match state.dbos.list_agents(&ctx).await {
        Ok(agents) => agents,
        Err(e) => {
            warn!(error = %e, "recovery: failed to list agents, skipping stale-state scan");
            Vec::new()
        }
    };

    let module_names = state.module_registry.names().collect::<Vec<_>>();

    let mut forced_failed = 0usize;
    for agent in agents {
        let mut modules = Vec::new();
        for module_name in &module_names {
            if let Ok(m) = state.dbos.list_module_states(&agent.agent_id, module_name, &ctx).await {
                modules.extend(m);
            }
        }
        for record in modules {
            let stale = matches!(record.state, StateSymbol::Started | StateSymbol::Running)
                && now.signed_duration_since(record.timestamp).num_seconds() > state.config.recovery_window_s;
            if !stale {
                continue;
            }
            let req = SetModuleStateRequest {
                request_id: record.request_id.clone(),
                agent_id: record.agent_id.clone(),
                module_name: record.module_name.clone(),
                state: StateSymbol::Failed,
                error_message: "orphaned by coordinator restart".to_string(),
                details: Default::default(),
            };
            if state.dbos.set_module_state(req, now, &ctx).await.is_ok() {
                forced_failed += 1;
                let entry = EventLogEntry::new(EventKind::WorkflowFailed, "forced failed on restart recovery scan", now)
                    .with_metadata("request_id", record.request_id.clone());
                let _ = state.dbos.log_event(entry, &ctx).await;
            }
        }
    }
    if forced_failed > 0 {
        info!(count = forced_failed, "recovery: forced stale workflows to failed");
    }

    match state.dbos.requeue_expired_tasks(now, &ctx).await {
        Ok(requeued) if !requeued.is_empty() => {
            info!(count = requeued.len(), "recovery: requeued orphaned tasks");
            for task in requeued {
                let entry = EventLogEntry::new(EventKind::TaskRequeued, "task requeued on restart recovery scan", now)
                    .with_metadata("task_id", task.task_id.clone());
                let _ = state.dbos.log_event(entry, &ctx).await;
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "recovery: failed to requeue expired tasks"),
    }
}
