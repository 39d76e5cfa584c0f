pub mod client;
pub mod protocol;
pub mod retry;
pub mod server;

pub use client::DbosClient;
pub use protocol::{DbosRequest, DbosResponse, FrameError, MAX_FRAME_BYTES};
pub use retry::RetryConfig;
pub use server::DbosServer;
