use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imn_kv::KvEngine;
use imn_model::{Agent, EventLogEntry, MeasurementResult, ModuleState, Task};
use tokio_util::sync::CancellationToken;

use crate::agents::AgentStore;
use crate::error::StoreError;
use crate::events::EventLog;
use crate::module_states::{ModuleStateStore, SetModuleStateRequest};
use crate::results::ResultStore;
use crate::tasks::TaskQueue;

/// The full RPC surface of spec.md §4.3 (C3), as a trait so the coordinator
/// can talk to either an in-process [`Dbos`] or an [`crate::rpc::client::DbosClient`]
/// over the wire without caring which.
#[async_trait]
pub trait DbosApi: Send + Sync {
    async fn register_agent(&self, agent: Agent, ctx: &CancellationToken) -> Result<(), StoreError>;
    async fn get_agent(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Agent, StoreError>;
    async fn list_agents(&self, ctx: &CancellationToken) -> Result<Vec<Agent>, StoreError>;

    async fn set_module_state(&self, req: SetModuleStateRequest, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<ModuleState, StoreError>;
    async fn set_module_state_with_version(
        &self,
        req: SetModuleStateRequest,
        expected_version: u64,
        now: DateTime<Utc>,
        ctx: &CancellationToken,
    ) -> Result<ModuleState, StoreError>;
    async fn get_module_state(&self, request_id: &str, ctx: &CancellationToken) -> Result<ModuleState, StoreError>;
    async fn list_module_states(&self, agent_id: &str, module_name: &str, ctx: &CancellationToken) -> Result<Vec<ModuleState>, StoreError>;

    async fn store_result(&self, result: MeasurementResult, ctx: &CancellationToken) -> Result<(), StoreError>;
    async fn get_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<MeasurementResult, StoreError>;
    async fn list_results(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Vec<MeasurementResult>, StoreError>;
    async fn delete_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<(), StoreError>;

    async fn schedule_task(&self, task: Task, ctx: &CancellationToken) -> Result<(), StoreError>;
    async fn get_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<Task, StoreError>;
    async fn list_due_tasks(&self, now: DateTime<Utc>, visibility_timeout_secs: i64, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError>;
    async fn ack_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<(), StoreError>;
    async fn nack_task(&self, task_id: &str, retry_delay_secs: i64, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Task, StoreError>;
    async fn requeue_expired_tasks(&self, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError>;

    async fn log_event(&self, entry: EventLogEntry, ctx: &CancellationToken) -> Result<(), StoreError>;
    async fn get_events(&self, limit: usize, ctx: &CancellationToken) -> Result<Vec<EventLogEntry>, StoreError>;
}

/// The in-process composition of every store (spec.md §4.2, C2), wired
/// together over a single [`KvEngine`].
pub struct Dbos {
    pub agents: AgentStore,
    pub module_states: ModuleStateStore,
    pub results: ResultStore,
    pub tasks: TaskQueue,
    pub events: EventLog,
    max_task_retries: u32,
}

impl Dbos {
    pub fn new(kv: Arc<dyn KvEngine>) -> Self {
        Self {
            agents: AgentStore::new(kv.clone()),
            module_states: ModuleStateStore::new(kv.clone()),
            results: ResultStore::new(kv.clone()),
            tasks: TaskQueue::new(kv.clone()),
            events: EventLog::new(kv),
            max_task_retries: imn_model::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_task_retries(mut self, max_task_retries: u32) -> Self {
        self.max_task_retries = max_task_retries;
        self
    }
}

#[async_trait]
impl DbosApi for Dbos {
    async fn register_agent(&self, agent: Agent, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.agents.register_agent(&agent, ctx).await
    }

    async fn get_agent(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Agent, StoreError> {
        self.agents.get_agent(agent_id, ctx).await
    }

    async fn list_agents(&self, ctx: &CancellationToken) -> Result<Vec<Agent>, StoreError> {
        self.agents.list_agents(ctx).await
    }

    async fn set_module_state(&self, req: SetModuleStateRequest, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        self.module_states.set_module_state(req, now, ctx).await
    }

    async fn set_module_state_with_version(
        &self,
        req: SetModuleStateRequest,
        expected_version: u64,
        now: DateTime<Utc>,
        ctx: &CancellationToken,
    ) -> Result<ModuleState, StoreError> {
        self.module_states.set_module_state_with_version(req, expected_version, now, ctx).await
    }

    async fn get_module_state(&self, request_id: &str, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        self.module_states.get_module_state(request_id, ctx).await
    }

    async fn list_module_states(&self, agent_id: &str, module_name: &str, ctx: &CancellationToken) -> Result<Vec<ModuleState>, StoreError> {
        self.module_states.list_module_states(agent_id, module_name, ctx).await
    }

    async fn store_result(&self, result: MeasurementResult, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.results.store_result(&result, ctx).await
    }

    async fn get_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<MeasurementResult, StoreError> {
        self.results.get_result(agent_id, request_id, ctx).await
    }

    async fn list_results(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Vec<MeasurementResult>, StoreError> {
        self.results.list_results(agent_id, ctx).await
    }

    async fn delete_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.results.delete_result(agent_id, request_id, ctx).await
    }

    async fn schedule_task(&self, task: Task, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.tasks.schedule_task(task, ctx).await
    }

    async fn get_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<Task, StoreError> {
        self.tasks.get_task(task_id, ctx).await
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>, visibility_timeout_secs: i64, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        self.tasks.claim_due_tasks(now, chrono::Duration::seconds(visibility_timeout_secs), ctx).await
    }

    async fn ack_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.tasks.ack_task(task_id, ctx).await
    }

    async fn nack_task(&self, task_id: &str, retry_delay_secs: i64, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Task, StoreError> {
        self.tasks.nack_task(task_id, chrono::Duration::seconds(retry_delay_secs), now, self.max_task_retries, ctx).await
    }

    async fn requeue_expired_tasks(&self, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        self.tasks.requeue_expired_tasks(now, ctx).await
    }

    async fn log_event(&self, entry: EventLogEntry, ctx: &CancellationToken) -> Result<(), StoreError> {
        self.events.log_event(&entry, ctx).await
    }

    async fn get_events(&self, limit: usize, ctx: &CancellationToken) -> Result<Vec<EventLogEntry>, StoreError> {
        self.events.get_events(limit, ctx).await
    }
}
