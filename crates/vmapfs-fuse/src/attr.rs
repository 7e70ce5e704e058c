use std::fs::Metadata;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::time::SystemTime;

use tracing::debug;

const BLOCK_SIZE: u32 = 4096;
const VIRTUAL_DIR_PERM: u16 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    RegularFile,
    Symlink,
    Other,
}

impl FileKind {
    pub fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_file() {
            FileKind::RegularFile
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        }
    }

    pub fn to_fuser(self) -> fuser::FileType {
        match self {
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Symlink => fuser::FileType::Symlink,
            FileKind::Other => fuser::FileType::RegularFile,
        }
    }
}

/// Owner reported on every node. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Effective uid/gid of this process.
    pub fn current() -> Self {
        // SAFETY: geteuid/getegid have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self { uid, gid }
    }

    /// Uses the overrides where given and the process identity otherwise.
    pub fn resolve(uid: Option<u32>, gid: Option<u32>) -> Self {
        let current = Self::current();
        let identity = Self {
            uid: uid.unwrap_or(current.uid),
            gid: gid.unwrap_or(current.gid),
        };
        debug!(uid = identity.uid, gid = identity.gid, "resolved identity");
        identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: FileKind,
    pub size: u64,
    pub perm: u16,
    pub nlink: u32,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
}

impl NodeAttr {
    /// Attributes of a directory that exists only in the namespace.
    pub fn virtual_dir(identity: Identity) -> Self {
        NodeAttr {
            kind: FileKind::Directory,
            size: BLOCK_SIZE as u64,
            perm: VIRTUAL_DIR_PERM,
            nlink: 2,
            mtime: SystemTime::UNIX_EPOCH,
            uid: identity.uid,
            gid: identity.gid,
        }
    }

    /// Attributes of a real source entry, reported under `identity`.
    pub fn from_metadata(meta: &Metadata, identity: Identity) -> Self {
        NodeAttr {
            kind: FileKind::from_file_type(meta.file_type()),
            size: meta.len(),
            perm: (meta.permissions().mode() & 0o7777) as u16,
            nlink: meta.nlink().min(u32::MAX as u64) as u32,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            uid: identity.uid,
            gid: identity.gid,
        }
    }

    pub fn blocks(&self) -> u64 {
        self.size.div_ceil(512)
    }

    pub fn to_fuser(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.size,
            blocks: self.blocks(),
            atime: self.mtime,
            mtime: self.mtime,
            ctime: self.mtime,
            crtime: SystemTime::UNIX_EPOCH,
            kind: self.kind.to_fuser(),
            perm: self.perm,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_dir_attrs() {
        let attr = NodeAttr::virtual_dir(Identity { uid: 1000, gid: 100 });
        assert_eq!(attr.kind, FileKind::Directory);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.uid, 1000);
        assert_eq!(attr.gid, 100);
    }

    #[test]
    fn test_from_metadata_uses_identity_not_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        let meta = std::fs::metadata(&path).unwrap();

        let attr = NodeAttr::from_metadata(&meta, Identity { uid: 4242, gid: 4343 });
        assert_eq!(attr.kind, FileKind::RegularFile);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.uid, 4242);
        assert_eq!(attr.gid, 4343);
    }

    #[test]
    fn test_blocks_round_up() {
        let mut attr = NodeAttr::virtual_dir(Identity { uid: 0, gid: 0 });
        attr.size = 0;
        assert_eq!(attr.blocks(), 0);
        attr.size = 1;
        assert_eq!(attr.blocks(), 1);
        attr.size = 1025;
        assert_eq!(attr.blocks(), 3);
    }

    #[test]
    fn test_to_fuser_carries_fields() {
        let attr = NodeAttr::virtual_dir(Identity { uid: 7, gid: 8 });
        let fattr = attr.to_fuser(42);
        assert_eq!(fattr.ino, 42);
        assert_eq!(fattr.kind, fuser::FileType::Directory);
        assert_eq!(fattr.perm, 0o755);
        assert_eq!(fattr.uid, 7);
        assert_eq!(fattr.blksize, 4096);
    }

    #[test]
    fn test_resolve_prefers_overrides() {
        let identity = Identity::resolve(Some(5), None);
        assert_eq!(identity.uid, 5);
        assert_eq!(identity.gid, Identity::current().gid);
    }
}
