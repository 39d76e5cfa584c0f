use axum::extract::{Query, State};
use axum::Json;
use imn_model::EventLogEntry;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// `GET /events?limit=N`
pub async fn get_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Result<Json<Vec<EventLogEntry>>, ApiError> {
    let ctx = CancellationToken::new();
    Ok(Json(state.dbos.get_events(query.limit, &ctx).await?))
}
