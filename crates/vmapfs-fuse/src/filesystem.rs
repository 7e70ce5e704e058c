//! The filesystem root: owns the namespace lock, the state manager and the
//! reported identity. Every node holds an `Arc` back to it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use vmapfs_state::{DirectorySet, FsState, StateManager, StateSnapshot};

use crate::attr::Identity;
use crate::dir::DirNode;
use crate::error::{Result, VfsError};
use crate::mapper::PathMapper;
use crate::node::Node;
use crate::path::VirtualPath;
use crate::unsorted::UnsortedDir;

/// In-memory namespace guarded by the filesystem-wide lock.
pub struct Namespace {
    pub mapper: PathMapper,
    pub directories: DirectorySet,
    pub version: u32,
}

impl Namespace {
    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            mappings: self.mapper.table(),
            directories: &self.directories,
            version: self.version,
        }
    }

    /// True if a directory or a placed file already lives at `path`.
    pub fn is_occupied(&self, path: &VirtualPath) -> bool {
        self.directories.contains(path.as_str()) || self.mapper.source_path_of(path).is_some()
    }

    /// True if anything at all lives strictly below `dir`.
    pub fn has_descendants(&self, dir: &VirtualPath) -> bool {
        self.mapper.has_placed_under(dir)
            || self
                .directories
                .iter()
                .any(|d| VirtualPath::new(d).is_within(dir))
    }
}

pub struct VmapFs {
    source_root: PathBuf,
    identity: Identity,
    manager: StateManager,
    namespace: RwLock<Namespace>,
}

impl VmapFs {
    /// Builds the root object from an already loaded state.
    pub fn new(
        source_root: impl AsRef<Path>,
        state: FsState,
        manager: StateManager,
        identity: Identity,
    ) -> Result<Arc<Self>> {
        let given = source_root.as_ref();
        let source_root = std::fs::canonicalize(given).map_err(|e| VfsError::from_io(e, given.display()))?;
        if !source_root.is_dir() {
            return Err(VfsError::NotDirectory {
                path: source_root.display().to_string(),
            });
        }
        // Fail at startup rather than on the first listing.
        std::fs::read_dir(&source_root)?;

        let FsState {
            mappings,
            mut directories,
            version,
        } = state;
        directories.ensure_root();
        let mapper = PathMapper::new(&source_root, mappings);
        info!(
            source = %source_root.display(),
            state = %manager.state_path().display(),
            directories = directories.len(),
            placed = mapper.placed_count(),
            "filesystem ready"
        );

        Ok(Arc::new(Self {
            source_root,
            identity,
            manager,
            namespace: RwLock::new(Namespace {
                mapper,
                directories,
                version,
            }),
        }))
    }

    /// Opens the state file at `state_path` and builds the root object.
    pub fn load(
        source_root: impl AsRef<Path>,
        state_path: impl AsRef<Path>,
        identity: Identity,
    ) -> Result<Arc<Self>> {
        let manager = StateManager::new(state_path)?;
        let state = manager.load()?;
        Self::new(source_root, state, manager, identity)
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.manager
    }

    pub fn root(self: &Arc<Self>) -> DirNode {
        DirNode::new(Arc::clone(self), VirtualPath::root())
    }

    pub fn unsorted_root(self: &Arc<Self>) -> UnsortedDir {
        UnsortedDir::root(Arc::clone(self))
    }

    /// Walks a mount-relative path from the root through ordinary lookups.
    pub fn resolve(self: &Arc<Self>, path: &str) -> Result<Node> {
        debug!(path, "resolving");
        let mut node = Node::Directory(self.root());
        for name in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            node = node.lookup(name)?;
        }
        Ok(node)
    }

    /// Owned copy of the current namespace in persisted form.
    pub fn to_state(&self) -> Result<FsState> {
        let ns = self.read()?;
        Ok(FsState {
            mappings: ns.mapper.table().clone(),
            directories: ns.directories.clone(),
            version: ns.version,
        })
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Namespace>> {
        self.namespace.read().map_err(|_| VfsError::LockPoisoned)
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Namespace>> {
        self.namespace.write().map_err(|_| VfsError::LockPoisoned)
    }

    /// Flushes the namespace. Called with the write lock held.
    pub(crate) fn persist(&self, ns: &Namespace) -> Result<()> {
        self.manager.save(&ns.snapshot())?;
        Ok(())
    }
}
