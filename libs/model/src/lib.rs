//! Shared domain types for the Internet Measurement Network control plane:
//! agents, the module-state transition table, results, tasks, event-log
//! entries, and declarative module schemas.

pub mod agent;
pub mod event;
pub mod module_state;
pub mod result;
pub mod schema;
pub mod task;
pub mod wire;

pub use agent::{Agent, HeartbeatMessage, DEFAULT_LIVENESS_WINDOW_SECS};
pub use event::{EventKind, EventLogEntry};
pub use module_state::{InvalidTransition, ModuleState, ModuleStateBroadcast, StateSymbol};
pub use result::MeasurementResult;
pub use schema::{FieldSpec, FieldType, ModuleSchema, SchemaRegistry, ValidationError};
pub use task::{Task, TaskStatus, DEFAULT_MAX_RETRIES};
pub use wire::{ModuleInvocation, ModuleInvocationFailure, ModuleInvocationOutcome, RunningNotice};
