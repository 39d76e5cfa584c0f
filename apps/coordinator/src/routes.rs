use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{agents, events, health, measurements, module_states, results, workflows};
use crate::state::AppState;

/// Assembles the REST surface of spec.md §4.7 (C7 — boundary only).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(health::get_health))
        .route("/agents", get(agents::list_agents))
        .route("/agents/alive", get(agents::list_alive_agents))
        .route("/agents/:id", get(agents::get_agent))
        .route("/agent/:id/:module", post(measurements::submit_sync))
        .route("/agent/:id/:module/async", post(measurements::submit_async))
        .route("/workflows", get(workflows::list_workflows))
        .route("/workflows/:id", get(workflows::get_workflow))
        .route("/workflows/:id/cancel", post(workflows::cancel))
        .route("/agents/:id/results", get(results::list_results))
        .route("/agents/:id/results/:rid", get(results::get_result).delete(results::delete_result))
        .route("/modules/states/:rid", get(module_states::get_module_state))
        .route("/events", get(events::get_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
