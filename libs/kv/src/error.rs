use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key not found")]
    NotFound,

    #[error("version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict { expected: Option<u64>, actual: Option<u64> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("other: {0}")]
    Other(String),
}

impl From<sled::Error> for KvError {
    fn from(e: sled::Error) -> Self {
        KvError::Transport(e.to_string())
    }
}

impl From<bincode::Error> for KvError {
    fn from(e: bincode::Error) -> Self {
        KvError::Other(format!("encoding error: {e}"))
    }
}
