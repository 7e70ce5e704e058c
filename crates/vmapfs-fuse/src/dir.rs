//! Virtual directories: the root and every directory a user created.
//!
//! A `DirNode` is only a path plus a handle on the filesystem. All answers
//! come from the shared mapping table and directory set at call time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::attr::{FileKind, NodeAttr};
use crate::error::{Result, VfsError};
use crate::file::FileNode;
use crate::filesystem::VmapFs;
use crate::node::{DirEntry, Node};
use crate::path::{validate_name, VirtualPath, UNSORTED_DIR};
use crate::unsorted::UnsortedDir;

pub struct DirNode {
    fs: Arc<VmapFs>,
    path: VirtualPath,
}

impl fmt::Debug for DirNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirNode")
            .field("path", &self.path)
            .finish()
    }
}

impl DirNode {
    pub(crate) fn new(fs: Arc<VmapFs>, path: VirtualPath) -> Self {
        Self { fs, path }
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn attributes(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::virtual_dir(self.fs.identity()))
    }

    pub fn lookup(&self, name: &str) -> Result<Node> {
        validate_name(name)?;
        if self.path.is_root() && name == UNSORTED_DIR {
            return Ok(Node::Unsorted(UnsortedDir::root(Arc::clone(&self.fs))));
        }

        let child = self.path.join(name);
        let ns = self.fs.read()?;
        if !ns.directories.contains(self.path.as_str()) {
            return Err(VfsError::not_found(&self.path));
        }
        if ns.directories.contains(child.as_str()) {
            return Ok(Node::Directory(DirNode::new(Arc::clone(&self.fs), child)));
        }
        if let Some(source) = ns.mapper.source_path_of(&child) {
            return Ok(Node::File(FileNode::placed(
                Arc::clone(&self.fs),
                source,
                child,
            )));
        }
        Err(VfsError::not_found(child))
    }

    /// `.`, `..`, then children sorted by name.
    pub fn list_children(&self) -> Result<Vec<DirEntry>> {
        let ns = self.fs.read()?;
        if !ns.directories.contains(self.path.as_str()) {
            return Err(VfsError::not_found(&self.path));
        }

        let mut children: BTreeMap<String, FileKind> = BTreeMap::new();
        if self.path.is_root() {
            children.insert(UNSORTED_DIR.to_string(), FileKind::Directory);
        }
        for name in ns.mapper.placed_children(&self.path) {
            children.insert(name, FileKind::RegularFile);
        }
        for dir in ns.directories.iter() {
            if let Some(name) = VirtualPath::new(dir).child_name_in(&self.path) {
                children.insert(name.to_string(), FileKind::Directory);
            }
        }

        let mut entries = DirEntry::dots();
        entries.extend(
            children
                .into_iter()
                .map(|(name, kind)| DirEntry::new(name, kind)),
        );
        debug!(path = %self.path, count = entries.len(), "listed virtual directory");
        Ok(entries)
    }

    pub fn create_child(&self, name: &str) -> Result<DirNode> {
        validate_name(name)?;
        if self.path.is_reserved() {
            return Err(VfsError::denied(&self.path, "mkdir"));
        }
        let child = self.path.join(name);
        if child.is_reserved() {
            return Err(VfsError::denied(&child, "mkdir"));
        }

        let mut ns = self.fs.write()?;
        if !ns.directories.contains(self.path.as_str()) {
            return Err(VfsError::not_found(&self.path));
        }
        if ns.is_occupied(&child) {
            return Err(VfsError::AlreadyExists {
                path: child.to_string(),
            });
        }
        ns.directories.insert(child.as_str());
        self.fs.persist(&ns)?;
        info!(path = %child, "created virtual directory");
        Ok(DirNode::new(Arc::clone(&self.fs), child))
    }

    /// Removes a child directory, or unplaces a child file.
    pub fn remove(&self, name: &str, is_dir: bool) -> Result<()> {
        validate_name(name)?;
        let child = self.path.join(name);
        if child.is_reserved() {
            return Err(VfsError::denied(&child, "remove"));
        }

        let mut ns = self.fs.write()?;
        if is_dir {
            if !ns.directories.contains(child.as_str()) {
                if ns.mapper.source_path_of(&child).is_some() {
                    return Err(VfsError::NotDirectory {
                        path: child.to_string(),
                    });
                }
                return Err(VfsError::not_found(&child));
            }
            if ns.has_descendants(&child) {
                return Err(VfsError::NotEmpty {
                    path: child.to_string(),
                });
            }
            ns.directories.remove(child.as_str());
            self.fs.persist(&ns)?;
            info!(path = %child, "removed virtual directory");
        } else {
            if ns.directories.contains(child.as_str()) {
                return Err(VfsError::IsDirectory {
                    path: child.to_string(),
                });
            }
            let source = ns
                .mapper
                .remove_mapping(&child)
                .ok_or_else(|| VfsError::not_found(&child))?;
            self.fs.persist(&ns)?;
            info!(path = %child, source = %source, "unplaced file");
        }
        Ok(())
    }

    pub fn rename(&self, old_name: &str, new_name: &str, target: &Node) -> Result<()> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        let old = self.path.join(old_name);
        let target_dir = match target {
            Node::Directory(d) => d.path().clone(),
            Node::Unsorted(_) => return Err(VfsError::denied(&old, "rename into unsorted view")),
            Node::File(f) => {
                return Err(VfsError::invalid(format!(
                    "rename target {} is not a directory",
                    f.label()
                )))
            }
        };
        let new = target_dir.join(new_name);
        if old.is_reserved() || new.is_reserved() {
            return Err(VfsError::denied(&new, "rename"));
        }

        let mut ns = self.fs.write()?;
        if !ns.directories.contains(target_dir.as_str()) {
            return Err(VfsError::not_found(&target_dir));
        }

        if ns.directories.contains(old.as_str()) {
            if old == new {
                return Ok(());
            }
            if new.is_within(&old) {
                return Err(VfsError::invalid(format!(
                    "cannot move {} into itself",
                    old
                )));
            }
            if ns.is_occupied(&new) {
                return Err(VfsError::AlreadyExists {
                    path: new.to_string(),
                });
            }

            let moved_dirs: Vec<(String, VirtualPath)> = ns
                .directories
                .iter()
                .filter_map(|d| VirtualPath::new(d).rebase(&old, &new).map(|n| (d.to_string(), n)))
                .collect();
            for (from, _) in &moved_dirs {
                ns.directories.remove(from);
            }
            for (_, to) in &moved_dirs {
                ns.directories.insert(to.as_str());
            }
            let moved_files = ns.mapper.rewrite_prefix(&old, &new);
            self.fs.persist(&ns)?;
            info!(
                from = %old,
                to = %new,
                directories = moved_dirs.len(),
                files = moved_files,
                "renamed virtual directory"
            );
            return Ok(());
        }

        let source = ns
            .mapper
            .source_path_of(&old)
            .ok_or_else(|| VfsError::not_found(&old))?;
        let full = source.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, &source))?;
        if meta.is_dir() {
            return Err(VfsError::IsDirectory {
                path: source.to_string(),
            });
        }
        if old == new {
            return Ok(());
        }
        if ns.directories.contains(new.as_str()) {
            return Err(VfsError::AlreadyExists {
                path: new.to_string(),
            });
        }
        if !ns.mapper.add_mapping(&new, &source)? {
            return Err(VfsError::not_found(&source));
        }
        self.fs.persist(&ns)?;
        info!(from = %old, to = %new, source = %source, "moved placed file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Identity;
    use tempfile::TempDir;

    struct Fixture {
        _source: TempDir,
        _state: TempDir,
        fs: Arc<VmapFs>,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let source = tempfile::tempdir().unwrap();
        for f in files {
            let path = source.path().join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"content").unwrap();
        }
        let state = tempfile::tempdir().unwrap();
        let fs = VmapFs::load(
            source.path(),
            state.path().join("state.json"),
            Identity { uid: 1, gid: 2 },
        )
        .unwrap();
        Fixture {
            _source: source,
            _state: state,
            fs,
        }
    }

    /// Moves `source` out of the unsorted view to the virtual path `at`.
    fn place(fs: &Arc<VmapFs>, source: &str, at: &str) {
        let (parent, name) = at.rsplit_once('/').unwrap();
        let target = fs.resolve(parent).unwrap();
        let src = crate::path::SourcePath::new(source).unwrap();
        let dir = fs.resolve(&format!("/_UNSORTED/{}", src.parent())).unwrap();
        dir.rename(src.base_name(), name, &target).unwrap();
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_root_lists_unsorted_and_dots() {
        let fx = fixture(&[]);
        let entries = fx.fs.root().list_children().unwrap();
        assert_eq!(names(&entries), vec![".", "..", "_UNSORTED"]);
    }

    #[test]
    fn test_create_child_and_lookup() {
        let fx = fixture(&[]);
        let root = fx.fs.root();
        let x = root.create_child("x").unwrap();
        assert_eq!(x.path().as_str(), "/x");
        assert!(matches!(root.lookup("x").unwrap(), Node::Directory(_)));
        x.create_child("y").unwrap();
        assert!(matches!(fx.fs.resolve("/x/y").unwrap(), Node::Directory(_)));
    }

    #[test]
    fn test_create_existing_child_fails() {
        let fx = fixture(&[]);
        fx.fs.root().create_child("x").unwrap();
        assert!(matches!(
            fx.fs.root().create_child("x"),
            Err(VfsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_create_reserved_name_is_denied() {
        let fx = fixture(&[]);
        let err = fx.fs.root().create_child(UNSORTED_DIR).err().unwrap();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_create_invalid_name() {
        let fx = fixture(&[]);
        assert!(matches!(
            fx.fs.root().create_child(".."),
            Err(VfsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_lookup_missing_child() {
        let fx = fixture(&[]);
        assert!(matches!(
            fx.fs.root().lookup("nope"),
            Err(VfsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_stale_directory_node_reports_not_found() {
        let fx = fixture(&[]);
        let x = fx.fs.root().create_child("x").unwrap();
        fx.fs.root().remove("x", true).unwrap();
        assert!(matches!(x.lookup("a"), Err(VfsError::NotFound { .. })));
        assert!(matches!(x.list_children(), Err(VfsError::NotFound { .. })));
    }

    #[test]
    fn test_remove_nonempty_directory() {
        let fx = fixture(&["f"]);
        fx.fs.root().create_child("x").unwrap();
        place(&fx.fs, "f", "/x/f");

        let err = fx.fs.root().remove("x", true).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_remove_directory_with_subdirectory() {
        let fx = fixture(&[]);
        let x = fx.fs.root().create_child("x").unwrap();
        x.create_child("y").unwrap();
        assert!(matches!(
            fx.fs.root().remove("x", true),
            Err(VfsError::NotEmpty { .. })
        ));
    }

    #[test]
    fn test_remove_kind_mismatch() {
        let fx = fixture(&["f"]);
        fx.fs.root().create_child("x").unwrap();
        place(&fx.fs, "f", "/f");

        assert!(matches!(
            fx.fs.root().remove("x", false),
            Err(VfsError::IsDirectory { .. })
        ));
        assert!(matches!(
            fx.fs.root().remove("f", true),
            Err(VfsError::NotDirectory { .. })
        ));
        assert!(matches!(
            fx.fs.root().remove("ghost", false),
            Err(VfsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unlink_returns_file_to_unsorted() {
        let fx = fixture(&["f"]);
        place(&fx.fs, "f", "/f");
        assert!(fx.fs.resolve("/_UNSORTED/f").is_err());

        fx.fs.root().remove("f", false).unwrap();
        assert!(fx.fs.resolve("/f").is_err());
        assert!(matches!(fx.fs.resolve("/_UNSORTED/f").unwrap(), Node::File(_)));
    }

    #[test]
    fn test_rename_directory_moves_nested_dirs_and_files() {
        let fx = fixture(&["f", "g"]);
        let x = fx.fs.root().create_child("x").unwrap();
        x.create_child("sub").unwrap();
        fx.fs.root().create_child("y").unwrap();
        place(&fx.fs, "f", "/x/f");
        place(&fx.fs, "g", "/x/sub/g");

        let target = fx.fs.resolve("/y").unwrap();
        fx.fs.root().rename("x", "x2", &target).unwrap();

        assert!(matches!(fx.fs.resolve("/y/x2/sub").unwrap(), Node::Directory(_)));
        assert!(matches!(fx.fs.resolve("/y/x2/sub/g").unwrap(), Node::File(_)));
        assert!(matches!(fx.fs.resolve("/y/x2/f").unwrap(), Node::File(_)));
        assert!(fx.fs.resolve("/x").is_err());
        assert!(fx.fs.resolve("/x/sub").is_err());
    }

    #[test]
    fn test_rename_directory_into_itself() {
        let fx = fixture(&[]);
        let x = fx.fs.root().create_child("x").unwrap();
        x.create_child("in").unwrap();
        let target = fx.fs.resolve("/x/in").unwrap();
        assert!(matches!(
            fx.fs.root().rename("x", "loop", &target),
            Err(VfsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_rename_onto_existing_name() {
        let fx = fixture(&[]);
        fx.fs.root().create_child("a").unwrap();
        fx.fs.root().create_child("b").unwrap();
        let root = Node::Directory(fx.fs.root());
        assert!(matches!(
            fx.fs.root().rename("a", "b", &root),
            Err(VfsError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_rename_into_unsorted_is_denied() {
        let fx = fixture(&[]);
        fx.fs.root().create_child("a").unwrap();
        let unsorted = Node::Unsorted(fx.fs.unsorted_root());
        let err = fx.fs.root().rename("a", "a", &unsorted).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_rename_to_reserved_name_is_denied() {
        let fx = fixture(&[]);
        fx.fs.root().create_child("a").unwrap();
        let root = Node::Directory(fx.fs.root());
        let err = fx.fs.root().rename("a", UNSORTED_DIR, &root).unwrap_err();
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn test_rename_onto_file_target_is_invalid() {
        let fx = fixture(&["f"]);
        fx.fs.root().create_child("a").unwrap();
        place(&fx.fs, "f", "/f");
        let file = fx.fs.resolve("/f").unwrap();
        let err = fx.fs.root().rename("a", "b", &file).unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_rename_placed_file() {
        let fx = fixture(&["f"]);
        fx.fs.root().create_child("x").unwrap();
        place(&fx.fs, "f", "/f");

        let target = fx.fs.resolve("/x").unwrap();
        fx.fs.root().rename("f", "renamed", &target).unwrap();
        assert!(fx.fs.resolve("/f").is_err());
        assert!(matches!(fx.fs.resolve("/x/renamed").unwrap(), Node::File(_)));
        assert_eq!(fx.fs.to_state().unwrap().mappings["f"].virtual_path, "/x/renamed");
    }

    #[test]
    fn test_rename_placed_file_with_vanished_source() {
        let fx = fixture(&["f"]);
        place(&fx.fs, "f", "/f");
        std::fs::remove_file(fx.fs.source_root().join("f")).unwrap();

        let root = Node::Directory(fx.fs.root());
        assert!(matches!(
            fx.fs.root().rename("f", "g", &root),
            Err(VfsError::NotFound { .. })
        ));
    }

    #[test]
    fn test_listing_shows_dirs_and_placed_files() {
        let fx = fixture(&["f"]);
        let x = fx.fs.root().create_child("x").unwrap();
        x.create_child("sub").unwrap();
        place(&fx.fs, "f", "/x/f");

        let entries = x.list_children().unwrap();
        assert_eq!(names(&entries), vec![".", "..", "f", "sub"]);
        assert_eq!(entries[2].kind, FileKind::RegularFile);
        assert_eq!(entries[3].kind, FileKind::Directory);
    }

    #[test]
    fn test_mutations_are_persisted() {
        let fx = fixture(&[]);
        fx.fs.root().create_child("x").unwrap();
        let on_disk = fx.fs.state_manager().load().unwrap();
        assert!(on_disk.directories.contains("/x"));
    }
}
