use imn_kv::KvError;
use imn_model::InvalidTransition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("version conflict: expected {expected:?}, found {actual:?}")]
    VersionConflict { expected: Option<u64>, actual: Option<u64> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("other: {0}")]
    Other(String),
}

impl From<KvError> for StoreError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::NotFound => StoreError::NotFound,
            KvError::VersionConflict { expected, actual } => StoreError::VersionConflict { expected, actual },
            KvError::Transport(m) => StoreError::Transport(m),
            KvError::Cancelled => StoreError::Cancelled,
            KvError::Other(m) => StoreError::Other(m),
        }
    }
}
