use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to prepare state location {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Refusing to write empty state data to {path}")]
    EmptyPayload { path: PathBuf },

    #[error("State file {path} is empty after write")]
    VerifyFailed { path: PathBuf },

    #[error("Failed to remove old backup {path}: {source}")]
    BackupRotation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

impl StateError {
    /// OS error code carried by the underlying I/O failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            StateError::Io(e) => e.raw_os_error(),
            StateError::Setup { source, .. } => source.raw_os_error(),
            StateError::BackupRotation { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
