//! The `_UNSORTED` view: the live source tree minus everything placed.
//!
//! Nothing here is cached or persisted. Hiding a directory whose files are
//! all placed takes a walk of its subtree, so every lookup and listing
//! costs time proportional to the subtree below it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::attr::{FileKind, NodeAttr};
use crate::error::{Result, VfsError};
use crate::file::FileNode;
use crate::filesystem::{Namespace, VmapFs};
use crate::mapper::PathMapper;
use crate::node::{DirEntry, Node};
use crate::path::{validate_name, SourcePath, VirtualPath};

pub struct UnsortedDir {
    fs: Arc<VmapFs>,
    path: SourcePath,
}

impl fmt::Debug for UnsortedDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsortedDir")
            .field("path", &self.path)
            .finish()
    }
}

impl UnsortedDir {
    pub(crate) fn root(fs: Arc<VmapFs>) -> Self {
        Self {
            fs,
            path: SourcePath::root(),
        }
    }

    pub fn source_path(&self) -> &SourcePath {
        &self.path
    }

    pub fn attributes(&self) -> Result<NodeAttr> {
        if self.path.is_root() {
            return Ok(NodeAttr::virtual_dir(self.fs.identity()));
        }
        let full = self.path.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, &self.path))?;
        Ok(NodeAttr::from_metadata(&meta, self.fs.identity()))
    }

    pub fn lookup(&self, name: &str) -> Result<Node> {
        validate_name(name)?;
        let child = self.path.join(name)?;
        let full = child.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, &child))?;

        let ns = self.fs.read()?;
        if ns.mapper.is_mapped(&child) {
            return Err(VfsError::not_found(&child));
        }
        if meta.is_dir() {
            if !has_unplaced_files(&ns.mapper, &full) {
                return Err(VfsError::not_found(&child));
            }
            return Ok(Node::Unsorted(UnsortedDir {
                fs: Arc::clone(&self.fs),
                path: child,
            }));
        }
        // FIFOs, sockets and devices can never be placed.
        if !meta.is_file() {
            return Err(VfsError::not_found(&child));
        }
        Ok(Node::File(FileNode::unsorted(Arc::clone(&self.fs), child)))
    }

    pub fn list_children(&self) -> Result<Vec<DirEntry>> {
        let full = self.path.resolve(self.fs.source_root());
        let reader = std::fs::read_dir(&full).map_err(|e| VfsError::from_io(e, &self.path))?;
        let ns = self.fs.read()?;

        let mut children = Vec::new();
        for entry in reader {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(name = ?raw, dir = %self.path, "skipping non UTF-8 entry");
                    continue;
                }
            };
            let child = self.path.join(&name)?;
            if ns.mapper.is_mapped(&child) {
                continue;
            }
            let child_full = entry.path();
            let meta = match std::fs::metadata(&child_full) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %child_full.display(), error = %e, "cannot stat entry");
                    continue;
                }
            };
            if meta.is_dir() {
                if !has_unplaced_files(&ns.mapper, &child_full) {
                    continue;
                }
            } else if !meta.is_file() {
                continue;
            }
            children.push(DirEntry::new(name, FileKind::from_file_type(meta.file_type())));
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries = DirEntry::dots();
        entries.extend(children);
        debug!(path = %self.path, count = entries.len(), "listed unsorted directory");
        Ok(entries)
    }

    /// Places `old_name` at `new_name` inside `target`.
    ///
    /// A file becomes one mapping. A directory becomes one mapping per
    /// unplaced file below it, with the same relative layout under the
    /// target, and every directory on the way is registered.
    pub fn rename(&self, old_name: &str, new_name: &str, target: &Node) -> Result<()> {
        validate_name(old_name)?;
        validate_name(new_name)?;
        let source = self.path.join(old_name)?;
        let target_dir = match target {
            Node::Directory(d) => d.path().clone(),
            Node::Unsorted(_) => {
                return Err(VfsError::denied(&source, "move within unsorted view"))
            }
            Node::File(f) => {
                return Err(VfsError::invalid(format!(
                    "rename target {} is not a directory",
                    f.label()
                )))
            }
        };
        let new = target_dir.join(new_name);
        if new.is_reserved() {
            return Err(VfsError::denied(&new, "rename"));
        }

        let full = source.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, &source))?;

        let mut ns = self.fs.write()?;
        if ns.mapper.is_mapped(&source) {
            return Err(VfsError::not_found(&source));
        }
        if !ns.directories.contains(target_dir.as_str()) {
            return Err(VfsError::not_found(&target_dir));
        }
        if ns.is_occupied(&new) || ns.has_descendants(&new) {
            return Err(VfsError::AlreadyExists {
                path: new.to_string(),
            });
        }

        if meta.is_file() {
            if !ns.mapper.add_mapping(&new, &source)? {
                return Err(VfsError::denied(&source, "place"));
            }
            self.fs.persist(&ns)?;
            info!(source = %source, to = %new, "placed file");
            return Ok(());
        }
        if !meta.is_dir() {
            return Err(VfsError::denied(&source, "place special file"));
        }

        let files = unplaced_files(&ns.mapper, &full)?;
        if files.is_empty() {
            return Err(VfsError::not_found(&source));
        }
        place_tree(&mut ns, &new, &files)?;
        self.fs.persist(&ns)?;
        info!(source = %source, to = %new, files = files.len(), "placed directory");
        Ok(())
    }
}

/// Maps each `(source, relative)` pair under `base` and registers `base`
/// and every intermediate directory.
fn place_tree(ns: &mut Namespace, base: &VirtualPath, files: &[(SourcePath, String)]) -> Result<()> {
    ns.directories.insert(base.as_str());
    for (source, rel) in files {
        let at = base.join(rel);
        let mut dir = at.parent();
        while dir.is_within(base) {
            let next = dir.parent();
            ns.directories.insert(dir.as_str());
            dir = next;
        }
        if !ns.mapper.add_mapping(&at, source)? {
            warn!(source = %source, "source vanished during placement");
        }
    }
    Ok(())
}

/// True if any regular file below `dir` is not placed. Unreadable entries
/// are skipped.
fn has_unplaced_files(mapper: &PathMapper, dir: &Path) -> bool {
    for entry in WalkDir::new(dir).follow_links(true).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match SourcePath::from_fs_path(mapper.source_root(), entry.path()) {
            Ok(sp) if !mapper.is_mapped(&sp) => return true,
            Ok(_) => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping entry"),
        }
    }
    false
}

/// Every unplaced regular file below `dir`, with its path relative to `dir`.
fn unplaced_files(mapper: &PathMapper, dir: &Path) -> Result<Vec<(SourcePath, String)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let source = SourcePath::from_fs_path(mapper.source_root(), entry.path())?;
        if mapper.is_mapped(&source) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .ok()
            .and_then(Path::to_str)
            .ok_or_else(|| VfsError::invalid(format!("bad entry {}", entry.path().display())))?
            .to_string();
        files.push((source, rel));
    }
    Ok(files)
}
