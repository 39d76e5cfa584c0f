use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /agents/{id}/results`
pub async fn list_results(State(state): State<AppState>, Path(agent_id): Path<String>) -> Result<Json<Vec<Value>>, ApiError> {
    let ctx = CancellationToken::new();
    let results = state.dbos.list_results(&agent_id, &ctx).await?;
    Ok(Json(results.iter().map(result_to_json).collect()))
}

/// `GET /agents/{id}/results/{rid}`
pub async fn get_result(State(state): State<AppState>, Path((agent_id, request_id)): Path<(String, String)>) -> Result<Json<Value>, ApiError> {
    let ctx = CancellationToken::new();
    let result = state.dbos.get_result(&agent_id, &request_id, &ctx).await?;
    Ok(Json(result_to_json(&result)))
}

/// `DELETE /agents/{id}/results/{rid}` — also clears the idempotency mark.
pub async fn delete_result(State(state): State<AppState>, Path((agent_id, request_id)): Path<(String, String)>) -> Result<Json<Value>, ApiError> {
    let ctx = CancellationToken::new();
    state.dbos.delete_result(&agent_id, &request_id, &ctx).await?;
    Ok(Json(json!({ "deleted": true })))
}

fn result_to_json(result: &imn_model::MeasurementResult) -> Value {
    json!({
        "result_id": result.result_id,
        "agent_id": result.agent_id,
        "request_id": result.request_id,
        "module_name": result.module_name,
        "payload": result.payload_as_json().unwrap_or(Value::Null),
        "created_at": result.created_at,
        "received_at": result.received_at,
    })
}
