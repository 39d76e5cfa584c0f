pub mod client;
pub mod protocol;
pub mod retry;
pub mod server;

pub use client::BusRpcClient;
pub use protocol::{BusControlRequest, BusControlResponse, FrameError, MAX_FRAME_BYTES};
pub use retry::RetryConfig;
pub use server::BusRpcServer;
