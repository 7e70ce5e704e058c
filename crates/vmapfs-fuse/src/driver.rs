//! `fuser::Filesystem` adapter.
//!
//! Turns kernel requests into node calls on [`VmapFs`]. The adapter keeps
//! only inode numbers and open handles; namespace state always comes from
//! the filesystem root.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyXattr, Request,
};
use tracing::{debug, info, warn};

use crate::error::{Result, VfsError};
use crate::filesystem::VmapFs;
use crate::handle::FileHandle;
use crate::inode::{InodeId, InodeTable, UNKNOWN_INODE};
use crate::node::{DirEntry, Node};
use crate::path::VirtualPath;

pub struct VmapFuse {
    fs: Arc<VmapFs>,
    inodes: InodeTable,
    handles: HashMap<u64, FileHandle>,
    next_fh: u64,
    ttl: Duration,
}

fn name_str(name: &OsStr) -> Result<&str> {
    name.to_str()
        .ok_or_else(|| VfsError::invalid(format!("non UTF-8 name {:?}", name)))
}

/// Logs a failed request and returns the errno to reply with.
fn errno(op: &str, err: VfsError) -> c_int {
    match &err {
        VfsError::NotFound { .. } | VfsError::NoAttribute { .. } => {
            debug!(op, error = %err, "request failed")
        }
        _ => warn!(op, error = %err, "request failed"),
    }
    err.to_errno()
}

/// Whether an attribute payload of `len` bytes fits a reply buffer of
/// `size`. `Ok(false)` means the caller only asked for the length.
pub(crate) fn xattr_fits(len: usize, size: u32) -> Result<bool> {
    if size == 0 {
        Ok(false)
    } else if len <= size as usize {
        Ok(true)
    } else {
        Err(VfsError::BufferTooSmall { needed: len })
    }
}

fn reply_xattr(op: &str, payload: &[u8], size: u32, reply: ReplyXattr) {
    match xattr_fits(payload.len(), size) {
        Ok(false) => reply.size(payload.len() as u32),
        Ok(true) => reply.data(payload),
        Err(e) => reply.error(errno(op, e)),
    }
}

/// NUL-terminated name list as listxattr returns it.
pub(crate) fn encode_xattr_names(names: &[String]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for name in names {
        buffer.extend_from_slice(name.as_bytes());
        buffer.push(0);
    }
    buffer
}

impl VmapFuse {
    pub fn new(fs: Arc<VmapFs>, ttl: Duration) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            handles: HashMap::new(),
            next_fh: 1,
            ttl,
        }
    }

    fn path_of(&self, ino: InodeId) -> Result<String> {
        self.inodes
            .path(ino)
            .map(str::to_string)
            .ok_or_else(|| VfsError::not_found(format!("inode {}", ino)))
    }

    fn node(&self, ino: InodeId) -> Result<Node> {
        let path = self.path_of(ino)?;
        self.fs.resolve(&path)
    }

    fn child_path(&self, parent: InodeId, name: &str) -> Result<String> {
        self.inodes
            .child_path(parent, name)
            .ok_or_else(|| VfsError::not_found(format!("inode {}", parent)))
    }

    fn entry_attr(&mut self, path: &str, node: &Node) -> Result<fuser::FileAttr> {
        let attr = node.attributes()?;
        let ino = self.inodes.lookup(path);
        Ok(attr.to_fuser(ino))
    }

    fn do_lookup(&mut self, parent: InodeId, name: &OsStr) -> Result<fuser::FileAttr> {
        let name = name_str(name)?;
        let child = self.node(parent)?.lookup(name)?;
        let path = self.child_path(parent, name)?;
        self.entry_attr(&path, &child)
    }

    fn do_mkdir(&mut self, parent: InodeId, name: &OsStr) -> Result<fuser::FileAttr> {
        let name = name_str(name)?;
        let created = match self.node(parent)? {
            Node::Directory(dir) => dir.create_child(name)?,
            Node::Unsorted(u) => return Err(VfsError::denied(u.source_path(), "mkdir")),
            Node::File(f) => return Err(VfsError::NotDirectory { path: f.label() }),
        };
        let node = Node::Directory(created);
        let path = self.child_path(parent, name)?;
        self.entry_attr(&path, &node)
    }

    fn do_remove(&mut self, parent: InodeId, name: &OsStr, is_dir: bool) -> Result<()> {
        let name = name_str(name)?;
        match self.node(parent)? {
            Node::Directory(dir) => dir.remove(name, is_dir),
            Node::Unsorted(u) => Err(VfsError::denied(u.source_path(), "remove")),
            Node::File(f) => Err(VfsError::NotDirectory { path: f.label() }),
        }
    }

    fn do_rename(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        newparent: InodeId,
        newname: &OsStr,
        flags: u32,
    ) -> Result<()> {
        if flags & libc::RENAME_EXCHANGE != 0 {
            return Err(VfsError::invalid("RENAME_EXCHANGE is not supported"));
        }
        let name = name_str(name)?;
        let newname = name_str(newname)?;
        let source_dir = self.node(parent)?;
        let target_dir = self.node(newparent)?;
        source_dir.rename(name, newname, &target_dir)?;

        let old_path = self.child_path(parent, name)?;
        let new_path = self.child_path(newparent, newname)?;
        self.inodes.rename(&old_path, &new_path);
        Ok(())
    }

    fn do_open(&mut self, ino: InodeId, flags: i32) -> Result<(u64, u32)> {
        let handle = match self.node(ino)? {
            Node::File(f) => f.open(flags)?,
            _ => return Err(VfsError::IsDirectory { path: self.path_of(ino)? }),
        };
        let open_flags = if handle.direct_io() {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        };
        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        Ok((fh, open_flags))
    }

    fn do_read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let offset = u64::try_from(offset)
            .map_err(|_| VfsError::invalid(format!("negative offset {}", offset)))?;
        let handle = self
            .handles
            .get(&fh)
            .ok_or_else(|| VfsError::invalid(format!("unknown file handle {}", fh)))?;
        handle.read_at(offset, size as usize)
    }

    /// Directory entries from `offset` on, as (inode, next offset, entry).
    /// Entries the kernel has not looked up get a placeholder inode and
    /// are not added to the inode table.
    fn readdir_entries(
        &self,
        ino: InodeId,
        offset: i64,
    ) -> Result<Vec<(InodeId, i64, DirEntry)>> {
        let path = self.path_of(ino)?;
        let entries = self.fs.resolve(&path)?.list_children()?;
        let dir = VirtualPath::new(&path);
        let skip = usize::try_from(offset).unwrap_or(0);

        Ok(entries
            .into_iter()
            .enumerate()
            .skip(skip)
            .map(|(i, entry)| {
                let child_ino = match entry.name.as_str() {
                    "." => Some(ino),
                    ".." => self.inodes.ino_of(dir.parent().as_str()),
                    name => self.inodes.ino_of(dir.join(name).as_str()),
                }
                .unwrap_or(UNKNOWN_INODE);
                (child_ino, (i + 1) as i64, entry)
            })
            .collect())
    }

    fn do_readdir(&self, ino: InodeId, offset: i64, reply: &mut ReplyDirectory) -> Result<()> {
        for (child_ino, next, entry) in self.readdir_entries(ino, offset)? {
            if reply.add(child_ino, next, entry.kind.to_fuser(), &entry.name) {
                break;
            }
        }
        Ok(())
    }

    fn file_node(&self, ino: InodeId) -> Result<Option<crate::file::FileNode>> {
        match self.node(ino)? {
            Node::File(f) => Ok(Some(f)),
            _ => Ok(None),
        }
    }
}

impl Filesystem for VmapFuse {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> std::result::Result<(), c_int> {
        info!(source = %self.fs.source_root().display(), "vmapfs session started");
        Ok(())
    }

    fn destroy(&mut self) {
        info!(open_handles = self.handles.len(), "vmapfs session ending");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent, name = ?name, "lookup");
        match self.do_lookup(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("lookup", e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!(ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino, "getattr");
        match self.node(ino).and_then(|n| n.attributes()) {
            Ok(attr) => reply.attr(&self.ttl, &attr.to_fuser(ino)),
            Err(e) => reply.error(errno("getattr", e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!(parent, name = ?name, mode, "mkdir");
        match self.do_mkdir(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mkdir", e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, name = ?name, "unlink");
        match self.do_remove(parent, name, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent, name = ?name, "rmdir");
        match self.do_remove(parent, name, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rmdir", e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(parent, name = ?name, newparent, newname = ?newname, flags, "rename");
        match self.do_rename(parent, name, newparent, newname, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");
        match self.do_open(ino, flags) {
            Ok((fh, open_flags)) => reply.opened(fh, open_flags),
            Err(e) => reply.error(errno("open", e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");
        match self.do_read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(fh, "release");
        match self.handles.remove(&fh) {
            Some(handle) => match handle.release() {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("release", e)),
            },
            None => reply.error(libc::EBADF),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!(ino, "opendir");
        match self.node(ino) {
            Ok(node) if node.is_dir() => reply.opened(0, 0),
            Ok(_) => reply.error(libc::ENOTDIR),
            Err(e) => reply.error(errno("opendir", e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, "readdir");
        match self.do_readdir(ino, offset, &mut reply) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("readdir", e)),
        }
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        debug!(ino, name = ?name, size, "getxattr");
        let value = name_str(name).and_then(|name| match self.file_node(ino)? {
            Some(f) => f.get_xattr(name),
            None => Err(VfsError::NoAttribute {
                name: name.to_string(),
            }),
        });
        match value {
            Ok(value) => reply_xattr("getxattr", &value, size, reply),
            Err(e) => reply.error(errno("getxattr", e)),
        }
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!(ino, size, "listxattr");
        let names = match self.file_node(ino) {
            Ok(Some(f)) => f.list_xattrs(),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(e),
        };
        match names {
            Ok(names) => reply_xattr("listxattr", &encode_xattr_names(&names), size, reply),
            Err(e) => reply.error(errno("listxattr", e)),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!(ino, name = ?name, len = value.len(), flags, "setxattr");
        let result = name_str(name).and_then(|name| {
            let file = self
                .file_node(ino)?
                .ok_or_else(|| VfsError::NotSupported {
                    op: "setxattr on a directory".to_string(),
                })?;
            if flags & (libc::XATTR_CREATE | libc::XATTR_REPLACE) != 0 {
                let exists = match file.get_xattr(name) {
                    Ok(_) => true,
                    Err(VfsError::NoAttribute { .. }) => false,
                    Err(e) => return Err(e),
                };
                if flags & libc::XATTR_CREATE != 0 && exists {
                    return Err(VfsError::AlreadyExists {
                        path: name.to_string(),
                    });
                }
                if flags & libc::XATTR_REPLACE != 0 && !exists {
                    return Err(VfsError::NoAttribute {
                        name: name.to_string(),
                    });
                }
            }
            file.set_xattr(name, value)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("setxattr", e)),
        }
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(ino, name = ?name, "removexattr");
        let result = name_str(name).and_then(|name| match self.file_node(ino)? {
            Some(f) => f.remove_xattr(name),
            None => Err(VfsError::NotSupported {
                op: "removexattr on a directory".to_string(),
            }),
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("removexattr", e)),
        }
    }
}
