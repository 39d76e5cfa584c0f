use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::dbos::DbosApi;

use super::protocol::{read_frame, write_frame, DbosRequest, DbosResponse, FrameError};

/// Binary RPC server for C3: accepts connections and dispatches each framed
/// [`DbosRequest`] to a shared [`DbosApi`] implementation. One connection
/// handles requests sequentially, in arrival order; independent connections
/// run concurrently.
pub struct DbosServer {
    api: Arc<dyn DbosApi>,
}

impl DbosServer {
    pub fn new(api: Arc<dyn DbosApi>) -> Self {
        Self { api }
    }

    #[instrument(skip(self))]
    pub async fn serve(&self, addr: impl ToSocketAddrs + std::fmt::Debug) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(local_addr = ?listener.local_addr()?, "dbos rpc server listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            let api = self.api.clone();
            tokio::spawn(async move {
                let (read_half, write_half) = socket.into_split();
                if let Err(e) = handle_connection(api, read_half, write_half).await {
                    warn!(%peer, error = %e, "dbos rpc connection ended");
                }
            });
        }
    }
}

async fn handle_connection<R, W>(api: Arc<dyn DbosApi>, read_half: R, write_half: W) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);
    loop {
        let request: DbosRequest = match read_frame(&mut reader).await {
            Ok(r) => r,
            Err(FrameError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = dispatch(&*api, request).await;
        write_frame(&mut writer, &response).await?;
    }
}

async fn dispatch(api: &dyn DbosApi, request: DbosRequest) -> DbosResponse {
    let ctx = CancellationToken::new();
    let result = run(api, request, &ctx).await;
    match result {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "dbos rpc handler error");
            DbosResponse::Error((&e).into())
        }
    }
}

async fn run(api: &dyn DbosApi, request: DbosRequest, ctx: &CancellationToken) -> Result<DbosResponse, crate::error::StoreError> {
    use DbosRequest::*;
    Ok(match request {
        RegisterAgent { agent } => {
            api.register_agent(agent, ctx).await?;
            DbosResponse::Unit
        }
        GetAgent { agent_id } => DbosResponse::Agent(api.get_agent(&agent_id, ctx).await?),
        ListAgents => DbosResponse::Agents(api.list_agents(ctx).await?),

        SetModuleState { req, now } => DbosResponse::ModuleState(api.set_module_state(req.into(), now, ctx).await?),
        SetModuleStateWithVersion { req, expected_version, now } => {
            DbosResponse::ModuleState(api.set_module_state_with_version(req.into(), expected_version, now, ctx).await?)
        }
        GetModuleState { request_id } => DbosResponse::ModuleState(api.get_module_state(&request_id, ctx).await?),
        ListModuleStates { agent_id, module_name } => {
            DbosResponse::ModuleStates(api.list_module_states(&agent_id, &module_name, ctx).await?)
        }

        StoreResult { result } => {
            api.store_result(result, ctx).await?;
            DbosResponse::Unit
        }
        GetResult { agent_id, request_id } => DbosResponse::Result(api.get_result(&agent_id, &request_id, ctx).await?),
        ListResults { agent_id } => DbosResponse::Results(api.list_results(&agent_id, ctx).await?),
        DeleteResult { agent_id, request_id } => {
            api.delete_result(&agent_id, &request_id, ctx).await?;
            DbosResponse::Unit
        }

        ScheduleTask { task } => {
            api.schedule_task(task, ctx).await?;
            DbosResponse::Unit
        }
        GetTask { task_id } => DbosResponse::Task(api.get_task(&task_id, ctx).await?),
        ListDueTasks { now, visibility_timeout_secs } => {
            DbosResponse::Tasks(api.list_due_tasks(now, visibility_timeout_secs, ctx).await?)
        }
        AckTask { task_id } => {
            api.ack_task(&task_id, ctx).await?;
            DbosResponse::Unit
        }
        NackTask { task_id, retry_delay_secs, now } => {
            DbosResponse::Task(api.nack_task(&task_id, retry_delay_secs, now, ctx).await?)
        }
        RequeueExpiredTasks { now } => DbosResponse::Tasks(api.requeue_expired_tasks(now, ctx).await?),

        LogEvent { entry } => {
            api.log_event(entry, ctx).await?;
            DbosResponse::Unit
        }
        GetEvents { limit } => DbosResponse::Events(api.get_events(limit, ctx).await?),
    })
}
