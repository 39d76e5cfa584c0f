//! Subject-routed pub/sub bus (spec.md §4.4, C4): a dotted subject
//! namespace, a payload-agnostic message envelope with trace-context
//! headers, and an in-process broker implementation.

pub mod broker;
pub mod bus;
pub mod message;
pub mod rpc;
pub mod subject;

pub use broker::InProcessBus;
pub use bus::{Bus, BusError, Handler, SubscriptionId};
pub use message::{BusMessage, TRACE_ID_HEADER};
pub use rpc::{BusRpcClient, BusRpcServer};
