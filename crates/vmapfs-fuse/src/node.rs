use crate::attr::{FileKind, NodeAttr};
use crate::dir::DirNode;
use crate::error::{Result, VfsError};
use crate::file::FileNode;
use crate::unsorted::UnsortedDir;

/// Every addressable object in the mounted namespace.
#[derive(Debug)]
pub enum Node {
    Directory(DirNode),
    File(FileNode),
    Unsorted(UnsortedDir),
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// `.` and `..`, which every listing starts with.
    pub(crate) fn dots() -> Vec<DirEntry> {
        vec![
            DirEntry::new(".", FileKind::Directory),
            DirEntry::new("..", FileKind::Directory),
        ]
    }
}

impl Node {
    pub fn attributes(&self) -> Result<NodeAttr> {
        match self {
            Node::Directory(d) => d.attributes(),
            Node::File(f) => f.attributes(),
            Node::Unsorted(u) => u.attributes(),
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            Node::Directory(_) | Node::Unsorted(_) => FileKind::Directory,
            Node::File(_) => FileKind::RegularFile,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn lookup(&self, name: &str) -> Result<Node> {
        match self {
            Node::Directory(d) => d.lookup(name),
            Node::Unsorted(u) => u.lookup(name),
            Node::File(f) => Err(VfsError::NotDirectory {
                path: f.label(),
            }),
        }
    }

    pub fn list_children(&self) -> Result<Vec<DirEntry>> {
        match self {
            Node::Directory(d) => d.list_children(),
            Node::Unsorted(u) => u.list_children(),
            Node::File(f) => Err(VfsError::NotDirectory {
                path: f.label(),
            }),
        }
    }

    /// Moves `old_name` out of this directory to `new_name` inside `target`.
    pub fn rename(&self, old_name: &str, new_name: &str, target: &Node) -> Result<()> {
        match self {
            Node::Directory(d) => d.rename(old_name, new_name, target),
            Node::Unsorted(u) => u.rename(old_name, new_name, target),
            Node::File(f) => Err(VfsError::NotDirectory {
                path: f.label(),
            }),
        }
    }
}
