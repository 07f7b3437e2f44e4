use std::path::PathBuf;

use thiserror::Error;

/// Failures a backend can surface to the runner. `KvCacheFull` is kept as
/// its own variant: the generation loop dispositions it differently from
/// every other decode failure.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("failed to create context: {0}")]
    Context(String),

    #[error("failed to create sampler: {0}")]
    Sampler(String),

    #[error("failed to allocate batch: {0}")]
    Batch(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("kv cache full")]
    KvCacheFull,

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("state file {path}: {reason}")]
    StateIo { path: PathBuf, reason: String },
}

impl BackendError {
    pub fn state_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BackendError::StateIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
