//! vmapfs: a user-organised virtual namespace over an immutable source
//! tree, with unplaced files reachable under `_UNSORTED`.

pub mod attr;
pub mod cli;
pub mod config;
pub mod dir;
pub mod driver;
pub mod error;
pub mod file;
pub mod filesystem;
pub mod handle;
pub mod inode;
pub mod mapper;
pub mod mount;
pub mod node;
pub mod path;
pub mod unsorted;

pub use attr::{FileKind, Identity, NodeAttr};
pub use error::{Result, VfsError};
pub use filesystem::VmapFs;
pub use node::{DirEntry, Node};
pub use path::{SourcePath, VirtualPath, UNSORTED_DIR};
