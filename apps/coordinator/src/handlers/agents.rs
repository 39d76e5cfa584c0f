use axum::extract::{Path, State};
use axum::Json;
use imn_model::Agent;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /agents`
pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    let ctx = CancellationToken::new();
    Ok(Json(state.dbos.list_agents(&ctx).await?))
}

/// `GET /agents/alive`
pub async fn list_alive_agents(State(state): State<AppState>) -> Result<Json<Vec<Agent>>, ApiError> {
    let ctx = CancellationToken::new();
    let now = chrono::Utc::now();
    let agents = state.dbos.list_agents(&ctx).await?;
    let alive = agents.into_iter().filter(|a| a.is_alive(now, state.config.liveness_window_secs())).collect();
    Ok(Json(alive))
}

/// `GET /agents/{id}`
pub async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<String>) -> Result<Json<Agent>, ApiError> {
    let ctx = CancellationToken::new();
    Ok(Json(state.dbos.get_agent(&agent_id, &ctx).await?))
}
