use std::fmt;
use std::fs::File;
use std::sync::Arc;

use tracing::{debug, info};

use crate::attr::NodeAttr;
use crate::error::{Result, VfsError};
use crate::filesystem::VmapFs;
use crate::handle::FileHandle;
use crate::path::{SourcePath, VirtualPath};

/// A source file, reached either through its placement or through the
/// unsorted view.
pub struct FileNode {
    fs: Arc<VmapFs>,
    source: SourcePath,
    virtual_path: Option<VirtualPath>,
}

impl fmt::Debug for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNode")
            .field("source", &self.source)
            .field("virtual_path", &self.virtual_path)
            .finish()
    }
}

impl FileNode {
    pub(crate) fn placed(fs: Arc<VmapFs>, source: SourcePath, virtual_path: VirtualPath) -> Self {
        Self {
            fs,
            source,
            virtual_path: Some(virtual_path),
        }
    }

    pub(crate) fn unsorted(fs: Arc<VmapFs>, source: SourcePath) -> Self {
        Self {
            fs,
            source,
            virtual_path: None,
        }
    }

    pub fn source_path(&self) -> &SourcePath {
        &self.source
    }

    pub fn virtual_path(&self) -> Option<&VirtualPath> {
        self.virtual_path.as_ref()
    }

    /// Path used in errors and logs.
    pub fn label(&self) -> String {
        match &self.virtual_path {
            Some(vp) => vp.to_string(),
            None => self.source.to_string(),
        }
    }

    /// Stats the source. A vanished source is reported, not healed.
    pub fn attributes(&self) -> Result<NodeAttr> {
        let full = self.source.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, self.label()))?;
        Ok(NodeAttr::from_metadata(&meta, self.fs.identity()))
    }

    /// Opens the source read-only. Any write intent is refused.
    pub fn open(&self, flags: i32) -> Result<FileHandle> {
        let write_intent = flags & libc::O_ACCMODE != libc::O_RDONLY
            || flags & (libc::O_TRUNC | libc::O_APPEND | libc::O_CREAT) != 0;
        if write_intent {
            return Err(VfsError::denied(self.label(), "open for writing"));
        }
        let full = self.source.resolve(self.fs.source_root());
        let meta = std::fs::metadata(&full).map_err(|e| VfsError::from_io(e, self.label()))?;
        if !meta.is_file() {
            return Err(VfsError::denied(self.label(), "open of a non-regular file"));
        }
        let file = File::open(&full).map_err(|e| VfsError::from_io(e, self.label()))?;
        debug!(path = %self.label(), source = %self.source, flags, "opened");
        Ok(FileHandle::new(file, self.label(), true))
    }

    pub fn get_xattr(&self, name: &str) -> Result<Vec<u8>> {
        let ns = self.fs.read()?;
        ns.mapper
            .get_xattr(&self.source, name)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| VfsError::NoAttribute {
                name: name.to_string(),
            })
    }

    pub fn list_xattrs(&self) -> Result<Vec<String>> {
        let ns = self.fs.read()?;
        Ok(ns.mapper.list_xattrs(&self.source))
    }

    pub fn set_xattr(&self, name: &str, value: &[u8]) -> Result<()> {
        let mut ns = self.fs.write()?;
        ns.mapper.set_xattr(&self.source, name, value)?;
        self.fs.persist(&ns)?;
        info!(source = %self.source, name, len = value.len(), "set xattr");
        Ok(())
    }

    pub fn remove_xattr(&self, name: &str) -> Result<()> {
        let mut ns = self.fs.write()?;
        ns.mapper.remove_xattr(&self.source, name)?;
        self.fs.persist(&ns)?;
        info!(source = %self.source, name, "removed xattr");
        Ok(())
    }
}
