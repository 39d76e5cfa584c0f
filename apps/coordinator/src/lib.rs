//! Control-plane server (spec.md C6/C7): validates and dispatches
//! measurement requests to agents over the bus, persists workflow lifecycle
//! and results through DBOS, consumes heartbeats, recovers from restarts,
//! and exposes a REST surface.

pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod recovery;
pub mod routes;
pub mod running_consumer;
pub mod state;

pub use config::CoordinatorConfig;
pub use state::AppState;
