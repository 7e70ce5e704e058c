#![warn(missing_docs)]

//! vmapfs persisted state: the mapping table, the virtual directory set,
//! and the manager that loads, saves and backs them up.

#[allow(missing_docs)]
pub mod error;
pub mod manager;
#[allow(missing_docs)]
pub mod types;

pub use error::{Result, StateError};
pub use manager::{StateManager, BACKUP_COUNT, BACKUP_DIR_NAME};
pub use types::{DirectorySet, FileMapping, FsState, StateSnapshot, ROOT_DIR, STATE_VERSION};
