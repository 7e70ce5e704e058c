use thiserror::Error;
use vmapfs_state::StateError;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State persistence failed: {0}")]
    State(#[from] StateError),

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Permission denied for {path}, operation: {op}")]
    PermissionDenied { path: String, op: String },

    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    #[error("Directory not empty: {path}")]
    NotEmpty { path: String },

    #[error("Is a directory: {path}")]
    IsDirectory { path: String },

    #[error("Not a directory: {path}")]
    NotDirectory { path: String },

    #[error("Name already exists: {path}")]
    AlreadyExists { path: String },

    #[error("No such attribute: {name}")]
    NoAttribute { name: String },

    #[error("Attribute buffer too small: need {needed} bytes")]
    BufferTooSmall { needed: usize },

    #[error("Operation not supported: {op}")]
    NotSupported { op: String },

    #[error("Namespace lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, VfsError>;

impl VfsError {
    pub fn not_found(path: impl ToString) -> Self {
        VfsError::NotFound {
            path: path.to_string(),
        }
    }

    pub fn denied(path: impl ToString, op: &str) -> Self {
        VfsError::PermissionDenied {
            path: path.to_string(),
            op: op.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        VfsError::InvalidArgument { msg: msg.into() }
    }

    /// Converts an I/O error on `path`, turning a missing file into
    /// [`VfsError::NotFound`] so callers see the path that vanished.
    pub fn from_io(err: std::io::Error, path: impl ToString) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            VfsError::not_found(path)
        } else {
            VfsError::Io(err)
        }
    }

    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            VfsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            VfsError::State(e) => e.raw_os_error().unwrap_or(EIO),
            VfsError::NotFound { .. } => ENOENT,
            VfsError::PermissionDenied { .. } => EPERM,
            VfsError::InvalidArgument { .. } => EINVAL,
            VfsError::NotEmpty { .. } => ENOTEMPTY,
            VfsError::IsDirectory { .. } => EISDIR,
            VfsError::NotDirectory { .. } => ENOTDIR,
            VfsError::AlreadyExists { .. } => EEXIST,
            VfsError::NoAttribute { .. } => ENODATA,
            VfsError::BufferTooSmall { .. } => ERANGE,
            VfsError::NotSupported { .. } => ENOTSUP,
            VfsError::LockPoisoned => EIO,
        }
    }
}
