use axum::extract::{Path, State};
use axum::Json;
use imn_model::ModuleState;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /modules/states/{rid}`
pub async fn get_module_state(State(state): State<AppState>, Path(request_id): Path<String>) -> Result<Json<ModuleState>, ApiError> {
    let ctx = CancellationToken::new();
    Ok(Json(state.dbos.get_module_state(&request_id, &ctx).await?))
}
