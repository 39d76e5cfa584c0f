use axum::extract::State;
use axum::Json;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /` — health summary (spec.md §4.7).
pub async fn get_health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let ctx = CancellationToken::new();
    let agents = state.dbos.list_agents(&ctx).await?;
    let now = chrono::Utc::now();
    let alive = agents.iter().filter(|a| a.is_alive(now, state.config.liveness_window_secs())).count();

    Ok(Json(json!({
        "status": "ok",
        "agents_total": agents.len(),
        "agents_alive": alive,
    })))
}
