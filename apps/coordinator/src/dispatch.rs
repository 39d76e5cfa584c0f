use std::collections::HashMap;

use chrono::Utc;
use imn_bus::{subject, BusMessage};
use imn_model::{EventKind, EventLogEntry, MeasurementResult, ModuleInvocation, StateSymbol};
use imn_store::{SetModuleStateRequest, StoreError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::correlator::CorrelatedOutcome;
use crate::error::ApiError;
use crate::state::AppState;

/// What a submitted measurement resolves to, for both the synchronous and
/// asynchronous REST entry points.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Completed { request_id: String, payload: Value },
    Errored { request_id: String, error: String },
    Failed { request_id: String, error: String },
    Accepted { request_id: String },
}

/// Runs spec.md §4.6 steps 1–4 (validate, mint workflow, persist start,
/// dispatch) and either awaits completion inline (`synchronous = true`) or
/// spawns the await/persist-completion tail and returns immediately.
#[instrument(skip(state, payload), fields(agent_id = %agent_id, module_name = %module_name))]
pub async fn submit_measurement(
    state: &AppState,
    agent_id: String,
    module_name: String,
    payload: Value,
    request_id: Option<String>,
    synchronous: bool,
) -> Result<SubmitOutcome, ApiError> {
    let ctx = CancellationToken::new();

    let schema = state
        .schemas
        .get(&module_name)
        .ok_or_else(|| ApiError::Validation(format!("unknown module '{module_name}'")))?;
    let normalized = imn_model::schema::validate(schema, &payload).map_err(|e| ApiError::Validation(e.to_string()))?;

    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    // Idempotency (spec.md §4.6 step 2): a prior call with this request_id
    // either already resolved (return its outcome) or is still in flight
    // (return a handle rather than double-dispatching).
    match state.dbos.get_module_state(&request_id, &ctx).await {
        Ok(existing) if existing.state.is_terminal() => return terminal_outcome(state, &existing, &ctx).await,
        Ok(_non_terminal) => return Ok(SubmitOutcome::Accepted { request_id }),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    if !state.try_acquire_slot(&agent_id) {
        return Err(ApiError::Busy);
    }

    if let Err(e) = persist_start(state, &request_id, &agent_id, &module_name, &ctx).await {
        state.release_slot(&agent_id);
        return Err(e.into());
    }

    let invocation = ModuleInvocation { request_id: request_id.clone(), module_name: module_name.clone(), input: normalized };
    let bytes = bincode::serialize(&invocation).map_err(|e| ApiError::Internal(e.to_string()))?;
    let in_subject = if state.module_registry.uses_module_scoped_subjects(&module_name) {
        subject::agent_module_in(&agent_id, &module_name)
    } else {
        subject::agent_in(&agent_id)
    };
    state.bus.publish(BusMessage::new(in_subject, bytes).with_trace_id(request_id.clone())).await;

    let tail_state = state.clone();
    let tail_agent = agent_id.clone();
    let tail_module = module_name.clone();
    let tail_request = request_id.clone();

    if synchronous {
        let outcome = await_and_persist(&tail_state, &tail_agent, &tail_module, &tail_request).await;
        tail_state.release_slot(&tail_agent);
        Ok(outcome)
    } else {
        tokio::spawn(async move {
            await_and_persist(&tail_state, &tail_agent, &tail_module, &tail_request).await;
            tail_state.release_slot(&tail_agent);
        });
        Ok(SubmitOutcome::Accepted { request_id })
    }
}

async fn persist_start(state: &AppState, request_id: &str, agent_id: &str, module_name: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
    let now = Utc::now();
    state
        .dbos
        .set_module_state(base_request(request_id, agent_id, module_name, StateSymbol::Created), now, ctx)
        .await?;
    state
        .dbos
        .set_module_state(base_request(request_id, agent_id, module_name, StateSymbol::Started), now, ctx)
        .await?;
    Ok(())
}

fn base_request(request_id: &str, agent_id: &str, module_name: &str, state: StateSymbol) -> SetModuleStateRequest {
    SetModuleStateRequest {
        request_id: request_id.to_string(),
        agent_id: agent_id.to_string(),
        module_name: module_name.to_string(),
        state,
        error_message: String::new(),
        details: HashMap::new(),
    }
}

/// Spec.md §4.6 steps 5–6: await the agent's out/error message and persist
/// the terminal state. Discards late results for a `request_id` that was
/// already forced terminal (e.g. by a cancel request).
async fn await_and_persist(state: &AppState, agent_id: &str, module_name: &str, request_id: &str) -> SubmitOutcome {
    let ctx = CancellationToken::new();
    let outcome = state.correlator.await_outcome(agent_id, module_name, request_id, state.config.request_timeout()).await;

    match current_is_terminal(state, request_id, &ctx).await {
        Ok(true) => {
            // Already resolved out from under us (cancellation race): discard.
            return discard_outcome(state, request_id, &ctx).await;
        }
        Ok(false) => {}
        Err(e) => warn!(request_id, error = %e, "failed to check current state before persisting completion"),
    }

    let now = Utc::now();
    match outcome {
        Ok(CorrelatedOutcome::Success(payload)) => {
            let result = MeasurementResult {
                result_id: Uuid::new_v4().to_string(),
                agent_id: agent_id.to_string(),
                request_id: request_id.to_string(),
                module_name: module_name.to_string(),
                payload: serde_json::to_vec(&payload).unwrap_or_default(),
                created_at: now,
                received_at: now,
                agent_start_time: now,
                agent_runtime_version: env!("CARGO_PKG_VERSION").to_string(),
                module_revision: "1".to_string(),
                server_id: state.server_id.to_string(),
                ingest_source: "bus".to_string(),
            };
            if let Err(e) = state.dbos.store_result(result.clone(), &ctx).await {
                warn!(request_id, error = %e, "failed to store result");
            }
            let _ = state
                .dbos
                .set_module_state(base_request(request_id, agent_id, module_name, StateSymbol::Completed), now, &ctx)
                .await;
            log_event(state, EventKind::WorkflowCompleted, request_id, "workflow completed", &ctx).await;
            SubmitOutcome::Completed { request_id: request_id.to_string(), payload }
        }
        Ok(CorrelatedOutcome::HandlerError { message }) => {
            let _ = state
                .dbos
                .set_module_state(
                    SetModuleStateRequest { error_message: message.clone(), ..base_request(request_id, agent_id, module_name, StateSymbol::Error) },
                    now,
                    &ctx,
                )
                .await;
            log_event(state, EventKind::WorkflowErrored, request_id, &message, &ctx).await;
            SubmitOutcome::Errored { request_id: request_id.to_string(), error: message }
        }
        Ok(CorrelatedOutcome::Crashed { message }) => {
            let _ = state
                .dbos
                .set_module_state(
                    SetModuleStateRequest { error_message: message.clone(), ..base_request(request_id, agent_id, module_name, StateSymbol::Failed) },
                    now,
                    &ctx,
                )
                .await;
            log_event(state, EventKind::HandlerCrash, request_id, &message, &ctx).await;
            SubmitOutcome::Failed { request_id: request_id.to_string(), error: message }
        }
        Err(_timeout_or_cancelled) => {
            let _ = state
                .dbos
                .set_module_state(
                    SetModuleStateRequest { error_message: "timed out".to_string(), ..base_request(request_id, agent_id, module_name, StateSymbol::Failed) },
                    now,
                    &ctx,
                )
                .await;
            log_event(state, EventKind::Timeout, request_id, "request timed out", &ctx).await;
            SubmitOutcome::Failed { request_id: request_id.to_string(), error: "timed out".to_string() }
        }
    }
}

async fn current_is_terminal(state: &AppState, request_id: &str, ctx: &CancellationToken) -> Result<bool, StoreError> {
    match state.dbos.get_module_state(request_id, ctx).await {
        Ok(s) => Ok(s.state.is_terminal()),
        Err(StoreError::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

async fn discard_outcome(state: &AppState, request_id: &str, ctx: &CancellationToken) -> SubmitOutcome {
    info!(request_id, "discarding late agent response for already-terminal workflow");
    match state.dbos.get_module_state(request_id, ctx).await {
        Ok(s) => terminal_outcome(state, &s, ctx).await.unwrap_or(SubmitOutcome::Failed { request_id: request_id.to_string(), error: "unknown".to_string() }),
        Err(_) => SubmitOutcome::Failed { request_id: request_id.to_string(), error: "unknown".to_string() },
    }
}

async fn terminal_outcome(state: &AppState, record: &imn_model::ModuleState, ctx: &CancellationToken) -> Result<SubmitOutcome, ApiError> {
    match record.state {
        StateSymbol::Completed => {
            let result = state.dbos.get_result(&record.agent_id, &record.request_id, ctx).await?;
            let payload = result.payload_as_json().unwrap_or(Value::Null);
            Ok(SubmitOutcome::Completed { request_id: record.request_id.clone(), payload })
        }
        StateSymbol::Error => Ok(SubmitOutcome::Errored { request_id: record.request_id.clone(), error: record.error_message.clone() }),
        _ => Ok(SubmitOutcome::Failed { request_id: record.request_id.clone(), error: record.error_message.clone() }),
    }
}

async fn log_event(state: &AppState, kind: EventKind, request_id: &str, message: &str, ctx: &CancellationToken) {
    let entry = EventLogEntry::new(kind, message, Utc::now()).with_metadata("request_id", request_id);
    if let Err(e) = state.dbos.log_event(entry, ctx).await {
        warn!(request_id, error = %e, "failed to append event log entry");
    }
}

/// Workflow cancellation (spec.md §4.6 "Workflow cancellation"): forces a
/// `{started|running} -> failed` transition with a `cancelled` marker.
pub async fn cancel_workflow(state: &AppState, request_id: &str) -> Result<(), ApiError> {
    let ctx = CancellationToken::new();
    let current = state.dbos.get_module_state(request_id, &ctx).await?;
    if current.state.is_terminal() {
        return Err(ApiError::InvalidTransition);
    }
    let mut details = HashMap::new();
    details.insert("cancelled".to_string(), "true".to_string());
    state
        .dbos
        .set_module_state(
            SetModuleStateRequest {
                request_id: request_id.to_string(),
                agent_id: current.agent_id.clone(),
                module_name: current.module_name.clone(),
                state: StateSymbol::Failed,
                error_message: "cancelled".to_string(),
                details,
            },
            Utc::now(),
            &ctx,
        )
        .await?;
    log_event(state, EventKind::Cancelled, request_id, "workflow cancelled", &ctx).await;
    Ok(())
}
