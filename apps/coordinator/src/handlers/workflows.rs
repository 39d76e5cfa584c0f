use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::dispatch::cancel_workflow;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    /// `terminal` or `non_terminal`; absent returns every known request id
    /// this process has observed is not supported without a full scan, so
    /// this filters the per-agent module-state index instead.
    pub status: Option<String>,
    pub agent_id: Option<String>,
    pub module_name: Option<String>,
}

/// `GET /workflows[?status=&agent_id=&module_name=]`. Narrowing by
/// `agent_id`/`module_name` hits the store's secondary index directly;
/// without them, every known agent/module combination is scanned.
pub async fn list_workflows(State(state): State<AppState>, Query(query): Query<WorkflowQuery>) -> Result<Json<Value>, ApiError> {
    let ctx = CancellationToken::new();

    let mut records = Vec::new();
    match (query.agent_id.as_deref(), query.module_name.as_deref()) {
        (Some(agent_id), Some(module_name)) => {
            records.extend(state.dbos.list_module_states(agent_id, module_name, &ctx).await?);
        }
        _ => {
            let agents = state.dbos.list_agents(&ctx).await?;
            let module_names = state.module_registry.names().collect::<Vec<_>>();
            for agent in agents {
                for module_name in &module_names {
                    if let Ok(found) = state.dbos.list_module_states(&agent.agent_id, module_name, &ctx).await {
                        records.extend(found);
                    }
                }
            }
        }
    }

    let filtered: Vec<_> = records
        .into_iter()
        .filter(|r| match query.status.as_deref() {
            Some("terminal") => r.state.is_terminal(),
            Some("non_terminal") => !r.state.is_terminal(),
            _ => true,
        })
        .collect();
    Ok(Json(json!(filtered)))
}

/// `GET /workflows/{id}`
pub async fn get_workflow(State(state): State<AppState>, Path(request_id): Path<String>) -> Result<Json<imn_model::ModuleState>, ApiError> {
    let ctx = CancellationToken::new();
    Ok(Json(state.dbos.get_module_state(&request_id, &ctx).await?))
}

/// `POST /workflows/{id}/cancel`
pub async fn cancel(State(state): State<AppState>, Path(request_id): Path<String>) -> Result<Json<Value>, ApiError> {
    cancel_workflow(&state, &request_id).await?;
    Ok(Json(json!({ "request_id": request_id, "cancelled": true })))
}
