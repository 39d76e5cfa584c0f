//! DBOS: the durable state store behind the coordinator (C2) and its binary
//! RPC service surface (C3). Five append/CAS-disciplined stores — agents,
//! module states, results, tasks, events — composed behind one [`dbos::Dbos`]
//! struct and one [`dbos::DbosApi`] trait, so the coordinator can be pointed
//! at an in-process store or a [`rpc::DbosClient`] without changing a line of
//! call-site code.

pub mod agents;
pub mod dbos;
pub mod error;
pub mod events;
pub mod module_states;
pub mod results;
pub mod rpc;
pub mod tasks;

pub use agents::AgentStore;
pub use dbos::{Dbos, DbosApi};
pub use error::StoreError;
pub use events::EventLog;
pub use module_states::{ModuleStateStore, SetModuleStateRequest};
pub use results::ResultStore;
pub use rpc::{DbosClient, DbosServer};
pub use tasks::TaskQueue;
