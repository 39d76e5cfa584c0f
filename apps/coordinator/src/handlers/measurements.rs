use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::dispatch::{submit_measurement, SubmitOutcome};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MeasurementRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub payload: Value,
}

/// `POST /agent/{id}/{module}` — synchronous measurement request.
pub async fn submit_sync(
    State(state): State<AppState>,
    Path((agent_id, module_name)): Path<(String, String)>,
    Json(req): Json<MeasurementRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let outcome = submit_measurement(&state, agent_id, module_name, req.payload, req.id, true).await?;
    Ok(Json(outcome))
}

/// `POST /agent/{id}/{module}/async` — returns the workflow id immediately.
pub async fn submit_async(
    State(state): State<AppState>,
    Path((agent_id, module_name)): Path<(String, String)>,
    Json(req): Json<MeasurementRequest>,
) -> Result<Json<SubmitOutcome>, ApiError> {
    let outcome = submit_measurement(&state, agent_id, module_name, req.payload, req.id, false).await?;
    Ok(Json(outcome))
}
