pub mod echo;
pub mod faulty;
pub mod ping;
pub mod tcping;

pub use echo::{EchoModule, WorkingModule};
pub use faulty::FaultyModule;
pub use ping::PingModule;
pub use tcping::TcpingModule;
