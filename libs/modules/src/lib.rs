//! The measurement module contract (spec.md §9 DESIGN NOTES "module
//! contract abstraction") and the fixed compile-time registry of built-in
//! modules: `ping_module`, `tcping`, `echo_module`/`working_module`, and
//! `faulty_module`.

pub mod builtins;
pub mod contract;
pub mod registry;

pub use builtins::{EchoModule, FaultyModule, PingModule, TcpingModule, WorkingModule};
pub use contract::{ModuleError, ModuleSpec};
pub use registry::ModuleRegistry;
