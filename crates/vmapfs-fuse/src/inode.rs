use std::collections::HashMap;

use tracing::trace;

use crate::path::VirtualPath;

pub type InodeId = u64;
pub const ROOT_INODE: InodeId = 1;

/// Inode reported for readdir entries the kernel has not looked up yet.
/// Listing never allocates, so only looked-up paths occupy the table.
pub const UNKNOWN_INODE: InodeId = 0xffff_ffff;

struct InodeEntry {
    path: String,
    lookup_count: u64,
}

/// Inode numbers handed to the kernel, each bound to a mount path.
///
/// Only paths are stored. Nodes are rebuilt from the path on every request.
/// An entry lives until the kernel forgets every lookup it was given.
pub struct InodeTable {
    entries: HashMap<InodeId, InodeEntry>,
    inodes: HashMap<String, InodeId>,
    next_ino: InodeId,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = InodeTable {
            entries: HashMap::new(),
            inodes: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        };
        table.entries.insert(
            ROOT_INODE,
            InodeEntry {
                path: "/".to_string(),
                lookup_count: 1,
            },
        );
        table.inodes.insert("/".to_string(), ROOT_INODE);
        table
    }

    pub fn path(&self, ino: InodeId) -> Option<&str> {
        self.entries.get(&ino).map(|e| e.path.as_str())
    }

    /// Inode already bound to `path`, without allocating.
    pub fn ino_of(&self, path: &str) -> Option<InodeId> {
        self.inodes.get(path).copied()
    }

    /// Inode of `path` for an entry reply. Allocates on first sight and
    /// counts one kernel reference.
    pub fn lookup(&mut self, path: &str) -> InodeId {
        if let Some(&ino) = self.inodes.get(path) {
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.lookup_count += 1;
            }
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.entries.insert(
            ino,
            InodeEntry {
                path: path.to_string(),
                lookup_count: 1,
            },
        );
        self.inodes.insert(path.to_string(), ino);
        trace!(ino, path, "allocated inode");
        ino
    }

    /// Mount path of `name` inside directory `parent`.
    pub fn child_path(&self, parent: InodeId, name: &str) -> Option<String> {
        let dir = self.path(parent)?;
        Some(VirtualPath::new(dir).join(name).as_str().to_string())
    }

    /// Re-keys `old` and everything below it to live under `new`. Inode
    /// numbers are kept so open kernel references stay valid.
    pub fn rename(&mut self, old: &str, new: &str) {
        let old_vp = VirtualPath::new(old);
        let new_vp = VirtualPath::new(new);
        let moved: Vec<(InodeId, String)> = self
            .entries
            .iter()
            .filter_map(|(&ino, entry)| {
                VirtualPath::new(&entry.path)
                    .rebase(&old_vp, &new_vp)
                    .map(|p| (ino, p.as_str().to_string()))
            })
            .collect();
        for (ino, _) in &moved {
            if let Some(entry) = self.entries.get(ino) {
                self.inodes.remove(&entry.path);
            }
        }
        for (ino, path) in moved {
            // A stale entry already at the destination loses its binding.
            if let Some(stale) = self.inodes.insert(path.clone(), ino) {
                if stale != ino {
                    self.entries.remove(&stale);
                }
            }
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.path = path;
            }
        }
    }

    /// Drops `n` kernel references. The entry goes once none remain. The
    /// root stays.
    pub fn forget(&mut self, ino: InodeId, n: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let should_remove = match self.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookup_count = entry.lookup_count.saturating_sub(n);
                entry.lookup_count == 0
            }
            None => false,
        };
        if should_remove {
            if let Some(entry) = self.entries.remove(&ino) {
                self.inodes.remove(&entry.path);
                trace!(ino, path = %entry.path, "released inode");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
