use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imn_model::{Agent, EventLogEntry, MeasurementResult, ModuleState, Task};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::dbos::DbosApi;
use crate::error::StoreError;
use crate::module_states::SetModuleStateRequest;

use super::protocol::{read_frame, write_frame, DbosRequest, DbosResponse};
use super::retry::RetryConfig;

type Conn = (BufReader<tokio::net::tcp::OwnedReadHalf>, BufWriter<tokio::net::tcp::OwnedWriteHalf>);

/// Client-side stub for the C3 binary RPC protocol. Requests are serialized
/// over a single persistent connection: the mutex enforces the one
/// request-in-flight-per-connection invariant the framing assumes. `addr`
/// is retained so a connection dropped by a transient failure can be
/// re-established by the retry loop in [`DbosClient::call`].
pub struct DbosClient {
    addr: String,
    conn: Mutex<Conn>,
    retry: RetryConfig,
}

impl DbosClient {
    pub async fn connect(addr: impl Into<String>) -> std::io::Result<Self> {
        let addr = addr.into();
        let conn = Self::dial(&addr).await?;
        Ok(Self { addr, conn: Mutex::new(conn), retry: RetryConfig::default() })
    }

    async fn dial(addr: &str) -> std::io::Result<Conn> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok((BufReader::new(read_half), BufWriter::new(write_half)))
    }

    /// Runs `request` with capped exponential backoff (spec.md §7: a
    /// transient RPC transport failure is retried, at least 3 attempts,
    /// before being surfaced). On a transport error the connection is torn
    /// down and redialed before the next attempt.
    #[instrument(skip(self, request, ctx))]
    async fn call(&self, request: DbosRequest, ctx: &CancellationToken) -> Result<DbosResponse, StoreError> {
        let mut attempt = 0;
        loop {
            match self.try_call(&request, ctx).await {
                Ok(response) => return Ok(response),
                Err(StoreError::Transport(reason)) => {
                    if attempt >= self.retry.max_retries {
                        return Err(StoreError::Transport(reason));
                    }
                    warn!(attempt, %reason, addr = %self.addr, "dbos rpc transport error, retrying");
                    if let Ok(fresh) = Self::dial(&self.addr).await {
                        *self.conn.lock().await = fresh;
                    }
                    self.retry.wait(attempt + 1).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_call(&self, request: &DbosRequest, ctx: &CancellationToken) -> Result<DbosResponse, StoreError> {
        let mut guard = self.conn.lock().await;
        let (reader, writer) = &mut *guard;

        let exchange = async {
            write_frame(writer, request).await.map_err(|e| StoreError::Transport(e.to_string()))?;
            read_frame::<_, DbosResponse>(reader).await.map_err(|e| StoreError::Transport(e.to_string()))
        };

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(StoreError::Cancelled),
            result = exchange => result,
        }
    }
}

fn unwrap(response: DbosResponse) -> Result<DbosResponse, StoreError> {
    match response {
        DbosResponse::Error(e) => Err(e.into()),
        other => Ok(other),
    }
}

macro_rules! expect_variant {
    ($response:expr, $variant:path) => {
        match $response {
            $variant(v) => Ok(v),
            other => Err(StoreError::Other(format!("unexpected dbos rpc response: {other:?}"))),
        }
    };
}

#[async_trait]
impl DbosApi for DbosClient {
    async fn register_agent(&self, agent: Agent, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(self.call(DbosRequest::RegisterAgent { agent }, ctx).await?)?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Agent, StoreError> {
        let response = unwrap(self.call(DbosRequest::GetAgent { agent_id: agent_id.to_string() }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Agent)
    }

    async fn list_agents(&self, ctx: &CancellationToken) -> Result<Vec<Agent>, StoreError> {
        let response = unwrap(self.call(DbosRequest::ListAgents, ctx).await?)?;
        expect_variant!(response, DbosResponse::Agents)
    }

    async fn set_module_state(&self, req: SetModuleStateRequest, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        let response = unwrap(self.call(DbosRequest::SetModuleState { req: req.into(), now }, ctx).await?)?;
        expect_variant!(response, DbosResponse::ModuleState)
    }

    async fn set_module_state_with_version(
        &self,
        req: SetModuleStateRequest,
        expected_version: u64,
        now: DateTime<Utc>,
        ctx: &CancellationToken,
    ) -> Result<ModuleState, StoreError> {
        let response =
            unwrap(self.call(DbosRequest::SetModuleStateWithVersion { req: req.into(), expected_version, now }, ctx).await?)?;
        expect_variant!(response, DbosResponse::ModuleState)
    }

    async fn get_module_state(&self, request_id: &str, ctx: &CancellationToken) -> Result<ModuleState, StoreError> {
        let response = unwrap(self.call(DbosRequest::GetModuleState { request_id: request_id.to_string() }, ctx).await?)?;
        expect_variant!(response, DbosResponse::ModuleState)
    }

    async fn list_module_states(&self, agent_id: &str, module_name: &str, ctx: &CancellationToken) -> Result<Vec<ModuleState>, StoreError> {
        let response = unwrap(
            self.call(
                DbosRequest::ListModuleStates { agent_id: agent_id.to_string(), module_name: module_name.to_string() },
                ctx,
            )
            .await?,
        )?;
        expect_variant!(response, DbosResponse::ModuleStates)
    }

    async fn store_result(&self, result: MeasurementResult, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(self.call(DbosRequest::StoreResult { result }, ctx).await?)?;
        Ok(())
    }

    async fn get_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<MeasurementResult, StoreError> {
        let response = unwrap(
            self.call(DbosRequest::GetResult { agent_id: agent_id.to_string(), request_id: request_id.to_string() }, ctx)
                .await?,
        )?;
        expect_variant!(response, DbosResponse::Result)
    }

    async fn list_results(&self, agent_id: &str, ctx: &CancellationToken) -> Result<Vec<MeasurementResult>, StoreError> {
        let response = unwrap(self.call(DbosRequest::ListResults { agent_id: agent_id.to_string() }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Results)
    }

    async fn delete_result(&self, agent_id: &str, request_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(
            self.call(DbosRequest::DeleteResult { agent_id: agent_id.to_string(), request_id: request_id.to_string() }, ctx)
                .await?,
        )?;
        Ok(())
    }

    async fn schedule_task(&self, task: Task, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(self.call(DbosRequest::ScheduleTask { task }, ctx).await?)?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<Task, StoreError> {
        let response = unwrap(self.call(DbosRequest::GetTask { task_id: task_id.to_string() }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Task)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>, visibility_timeout_secs: i64, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        let response = unwrap(self.call(DbosRequest::ListDueTasks { now, visibility_timeout_secs }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Tasks)
    }

    async fn ack_task(&self, task_id: &str, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(self.call(DbosRequest::AckTask { task_id: task_id.to_string() }, ctx).await?)?;
        Ok(())
    }

    async fn nack_task(&self, task_id: &str, retry_delay_secs: i64, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Task, StoreError> {
        let response =
            unwrap(self.call(DbosRequest::NackTask { task_id: task_id.to_string(), retry_delay_secs, now }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Task)
    }

    async fn requeue_expired_tasks(&self, now: DateTime<Utc>, ctx: &CancellationToken) -> Result<Vec<Task>, StoreError> {
        let response = unwrap(self.call(DbosRequest::RequeueExpiredTasks { now }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Tasks)
    }

    async fn log_event(&self, entry: EventLogEntry, ctx: &CancellationToken) -> Result<(), StoreError> {
        unwrap(self.call(DbosRequest::LogEvent { entry }, ctx).await?)?;
        Ok(())
    }

    async fn get_events(&self, limit: usize, ctx: &CancellationToken) -> Result<Vec<EventLogEntry>, StoreError> {
        let response = unwrap(self.call(DbosRequest::GetEvents { limit }, ctx).await?)?;
        expect_variant!(response, DbosResponse::Events)
    }
}
