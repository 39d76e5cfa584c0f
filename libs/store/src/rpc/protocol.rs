use std::collections::HashMap;

use chrono::{DateTime, Utc};
use imn_model::{Agent, EventLogEntry, MeasurementResult, ModuleState, StateSymbol, Task};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::StoreError;
use crate::module_states::SetModuleStateRequest;

/// Hard ceiling on a single framed message, mirroring the 10MB cap the
/// underlying transport layer documents to keep a misbehaving peer from
/// exhausting memory with a bogus length prefix.
pub const MAX_FRAME_BYTES: u32 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    TooLarge(u32),
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Wire form of [`SetModuleStateRequest`] (the original isn't `Serialize`
/// since it's a store-internal input type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetModuleStateWire {
    pub request_id: String,
    pub agent_id: String,
    pub module_name: String,
    pub state: StateSymbol,
    pub error_message: String,
    pub details: HashMap<String, String>,
}

impl From<SetModuleStateRequest> for SetModuleStateWire {
    fn from(r: SetModuleStateRequest) -> Self {
        Self {
            request_id: r.request_id,
            agent_id: r.agent_id,
            module_name: r.module_name,
            state: r.state,
            error_message: r.error_message,
            details: r.details,
        }
    }
}

impl From<SetModuleStateWire> for SetModuleStateRequest {
    fn from(w: SetModuleStateWire) -> Self {
        Self {
            request_id: w.request_id,
            agent_id: w.agent_id,
            module_name: w.module_name,
            state: w.state,
            error_message: w.error_message,
            details: w.details,
        }
    }
}

/// Every method in the C3 RPC surface, as a single framed request enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DbosRequest {
    RegisterAgent { agent: Agent },
    GetAgent { agent_id: String },
    ListAgents,

    SetModuleState { req: SetModuleStateWire, now: DateTime<Utc> },
    SetModuleStateWithVersion { req: SetModuleStateWire, expected_version: u64, now: DateTime<Utc> },
    GetModuleState { request_id: String },
    ListModuleStates { agent_id: String, module_name: String },

    StoreResult { result: MeasurementResult },
    GetResult { agent_id: String, request_id: String },
    ListResults { agent_id: String },
    DeleteResult { agent_id: String, request_id: String },

    ScheduleTask { task: Task },
    GetTask { task_id: String },
    ListDueTasks { now: DateTime<Utc>, visibility_timeout_secs: i64 },
    AckTask { task_id: String },
    NackTask { task_id: String, retry_delay_secs: i64, now: DateTime<Utc> },
    RequeueExpiredTasks { now: DateTime<Utc> },

    LogEvent { entry: EventLogEntry },
    GetEvents { limit: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DbosResponse {
    Unit,
    Agent(Agent),
    Agents(Vec<Agent>),
    ModuleState(ModuleState),
    ModuleStates(Vec<ModuleState>),
    Result(MeasurementResult),
    Results(Vec<MeasurementResult>),
    Task(Task),
    Tasks(Vec<Task>),
    Events(Vec<EventLogEntry>),
    Error(RemoteStoreError),
}

/// [`StoreError`] flattened to cross the wire; reconstructed by the client
/// into an approximate local [`StoreError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteStoreError {
    NotFound,
    InvalidTransition { request_id: String, from: StateSymbol, to: StateSymbol },
    VersionConflict { expected: Option<u64>, actual: Option<u64> },
    Transport(String),
    Cancelled,
    Other(String),
}

impl From<&StoreError> for RemoteStoreError {
    fn from(e: &StoreError) -> Self {
        match e {
            StoreError::NotFound => RemoteStoreError::NotFound,
            StoreError::InvalidTransition(t) => {
                RemoteStoreError::InvalidTransition { request_id: t.request_id.clone(), from: t.from, to: t.to }
            }
            StoreError::VersionConflict { expected, actual } => {
                RemoteStoreError::VersionConflict { expected: *expected, actual: *actual }
            }
            StoreError::Transport(m) => RemoteStoreError::Transport(m.clone()),
            StoreError::Cancelled => RemoteStoreError::Cancelled,
            StoreError::Other(m) => RemoteStoreError::Other(m.clone()),
        }
    }
}

impl From<RemoteStoreError> for StoreError {
    fn from(e: RemoteStoreError) -> Self {
        match e {
            RemoteStoreError::NotFound => StoreError::NotFound,
            RemoteStoreError::InvalidTransition { request_id, from, to } => {
                StoreError::InvalidTransition(imn_model::InvalidTransition { request_id, from, to })
            }
            RemoteStoreError::VersionConflict { expected, actual } => StoreError::VersionConflict { expected, actual },
            RemoteStoreError::Transport(m) => StoreError::Transport(m),
            RemoteStoreError::Cancelled => StoreError::Cancelled,
            RemoteStoreError::Other(m) => StoreError::Other(m),
        }
    }
}

/// Writes `msg` as a 4-byte big-endian length prefix followed by its bincode
/// encoding.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(msg)?;
    let len = u32::try_from(bytes.len()).map_err(|_| FrameError::TooLarge(u32::MAX))?;
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed bincode frame, rejecting any declared length
/// over [`MAX_FRAME_BYTES`] before allocating the buffer.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(FrameError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}
