//! Shared fixtures: a real source tree and state file in temp dirs.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use vmapfs_fuse::{Identity, Node, VmapFs};

pub struct Fixture {
    pub source: TempDir,
    pub state_dir: TempDir,
    pub fs: Arc<VmapFs>,
}

impl Fixture {
    /// Creates each file (with parents) under a fresh source root.
    pub fn new(files: &[&str]) -> Self {
        let source = tempfile::tempdir().unwrap();
        for f in files {
            write_source(source.path(), f);
        }
        let state_dir = tempfile::tempdir().unwrap();
        let fs = VmapFs::load(
            source.path(),
            state_dir.path().join("state.json"),
            Identity { uid: 1000, gid: 1000 },
        )
        .unwrap();
        Self {
            source,
            state_dir,
            fs,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.path().join("state.json")
    }

    /// A second filesystem over the same source and state file.
    pub fn reopen(&self) -> Arc<VmapFs> {
        VmapFs::load(
            self.source.path(),
            self.state_path(),
            Identity { uid: 1000, gid: 1000 },
        )
        .unwrap()
    }

    pub fn resolve(&self, path: &str) -> Node {
        self.fs.resolve(path).unwrap()
    }

    /// Names listed at `path`, without `.` and `..`.
    pub fn list(&self, path: &str) -> Vec<String> {
        self.resolve(path)
            .list_children()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .filter(|n| n != "." && n != "..")
            .collect()
    }

    pub fn mkdir(&self, parent: &str, name: &str) {
        match self.resolve(parent) {
            Node::Directory(d) => {
                d.create_child(name).unwrap();
            }
            other => panic!("{} is not a virtual directory: {:?}", parent, other),
        }
    }

    /// Moves `/_UNSORTED/<source>` to `<target_dir>/<name>`.
    pub fn place(&self, source: &str, target_dir: &str, name: &str) -> vmapfs_fuse::Result<()> {
        let (parent, base) = match source.rsplit_once('/') {
            Some((p, b)) => (format!("/_UNSORTED/{}", p), b),
            None => ("/_UNSORTED".to_string(), source),
        };
        let from = self.fs.resolve(&parent)?;
        let to = self.fs.resolve(target_dir)?;
        from.rename(base, name, &to)
    }

    /// Source path behind the file at `path`, if `path` resolves to a file.
    pub fn source_of(&self, path: &str) -> Option<String> {
        match self.fs.resolve(path) {
            Ok(Node::File(f)) => Some(f.source_path().as_str().to_string()),
            _ => None,
        }
    }
}

pub fn write_source(root: &Path, rel: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, rel.as_bytes()).unwrap();
}
