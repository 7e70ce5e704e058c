//! The two path namespaces.
//!
//! [`SourcePath`] is relative to the source root and never escapes it.
//! [`VirtualPath`] is absolute in the presented namespace. Both are
//! lexically cleaned on construction, so equal strings mean equal paths.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{Result, VfsError};

/// Reserved top-level name of the unsorted view.
pub const UNSORTED_DIR: &str = "_UNSORTED";

/// Resolves `.` and `..` lexically. Leading `..` segments are kept for
/// relative input and dropped for rooted input.
fn clean_components(raw: &str, rooted: bool) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|last| *last != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Checks a single directory entry name.
pub fn validate_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(VfsError::invalid(format!("invalid entry name {:?}", name)));
    }
    Ok(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourcePath {
    path: String,
}

impl SourcePath {
    /// Cleans `raw` and strips any leading separator. Input that still
    /// climbs above the source root after cleaning is rejected.
    pub fn new(raw: &str) -> Result<Self> {
        let rooted = raw.starts_with('/');
        let parts = clean_components(raw, rooted);
        if parts.first() == Some(&"..") {
            return Err(VfsError::invalid(format!(
                "source path {:?} escapes the source root",
                raw
            )));
        }
        let path = parts.join("/");
        trace!(raw, cleaned = %path, "source path");
        Ok(Self { path })
    }

    pub fn root() -> Self {
        Self {
            path: String::new(),
        }
    }

    /// Builds the source path of `full`, a real path below `root`.
    pub fn from_fs_path(root: &Path, full: &Path) -> Result<Self> {
        let rel = full.strip_prefix(root).map_err(|_| {
            VfsError::invalid(format!(
                "{} is outside source root {}",
                full.display(),
                root.display()
            ))
        })?;
        let rel = rel
            .to_str()
            .ok_or_else(|| VfsError::invalid(format!("non UTF-8 path {}", full.display())))?;
        Self::new(rel)
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn join(&self, name: &str) -> Result<Self> {
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(&format!("{}/{}", self.path, name))
        }
    }

    pub fn parent(&self) -> Self {
        match self.path.rfind('/') {
            Some(idx) => Self {
                path: self.path[..idx].to_string(),
            },
            None => Self::root(),
        }
    }

    pub fn base_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Real filesystem location of this path under `source_root`.
    pub fn resolve(&self, source_root: &Path) -> PathBuf {
        if self.is_root() {
            source_root.to_path_buf()
        } else {
            source_root.join(&self.path)
        }
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    path: String,
}

impl VirtualPath {
    /// Cleans `raw` and makes it absolute.
    pub fn new(raw: &str) -> Self {
        let parts = clean_components(raw, true);
        let mut path = String::with_capacity(raw.len() + 1);
        path.push('/');
        path.push_str(&parts.join("/"));
        Self { path }
    }

    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// True when the first component is the unsorted view's name.
    pub fn is_reserved(&self) -> bool {
        self.path[1..].split('/').next() == Some(UNSORTED_DIR)
    }

    pub fn join(&self, rel: &str) -> Self {
        Self::new(&format!("{}/{}", self.path, rel))
    }

    pub fn parent(&self) -> Self {
        match self.path.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self {
                path: self.path[..idx].to_string(),
            },
        }
    }

    pub fn base_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// Remainder of this path below `dir`, or `None` if it is not a strict
    /// descendant.
    pub fn strip_dir_prefix(&self, dir: &VirtualPath) -> Option<&str> {
        let rest = if dir.is_root() {
            &self.path[1..]
        } else {
            self.path.strip_prefix(dir.as_str())?.strip_prefix('/')?
        };
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    pub fn is_within(&self, dir: &VirtualPath) -> bool {
        self.strip_dir_prefix(dir).is_some()
    }

    /// Name of this path if it is an immediate child of `dir`.
    pub fn child_name_in(&self, dir: &VirtualPath) -> Option<&str> {
        self.strip_dir_prefix(dir).filter(|rest| !rest.contains('/'))
    }

    /// Moves this path from under `old` to under `new`. Returns `None` when
    /// the path is neither `old` nor inside it.
    pub fn rebase(&self, old: &VirtualPath, new: &VirtualPath) -> Option<VirtualPath> {
        if self == old {
            return Some(new.clone());
        }
        self.strip_dir_prefix(old).map(|rest| new.join(rest))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_source_path_cleans_and_strips_leading_separator() {
        assert_eq!(SourcePath::new("/a/b/../c").unwrap().as_str(), "a/c");
        assert_eq!(SourcePath::new("a//b/./c/").unwrap().as_str(), "a/b/c");
        assert_eq!(SourcePath::new(".").unwrap().as_str(), "");
        assert_eq!(SourcePath::new("").unwrap().as_str(), "");
    }

    #[test]
    fn test_source_path_rejects_escape() {
        assert!(SourcePath::new("../etc/passwd").is_err());
        assert!(SourcePath::new("a/../../b").is_err());
    }

    #[test]
    fn test_rooted_source_path_cannot_escape() {
        assert_eq!(SourcePath::new("/../../x").unwrap().as_str(), "x");
    }

    #[test]
    fn test_source_path_parent_and_base() {
        let sp = SourcePath::new("a/b/c.txt").unwrap();
        assert_eq!(sp.parent().as_str(), "a/b");
        assert_eq!(sp.base_name(), "c.txt");
        assert_eq!(SourcePath::new("top").unwrap().parent(), SourcePath::root());
    }

    #[test]
    fn test_source_path_join_and_resolve() {
        let root = SourcePath::root();
        let child = root.join("a").unwrap().join("b.txt").unwrap();
        assert_eq!(child.as_str(), "a/b.txt");
        assert_eq!(
            child.resolve(Path::new("/srv/media")),
            PathBuf::from("/srv/media/a/b.txt")
        );
        assert_eq!(root.resolve(Path::new("/srv")), PathBuf::from("/srv"));
        assert!(child.join("../../..").is_err());
    }

    #[test]
    fn test_source_path_from_fs_path() {
        let sp = SourcePath::from_fs_path(Path::new("/srv"), Path::new("/srv/a/b")).unwrap();
        assert_eq!(sp.as_str(), "a/b");
        assert!(SourcePath::from_fs_path(Path::new("/srv"), Path::new("/etc/x")).is_err());
    }

    #[test]
    fn test_virtual_path_forces_leading_separator() {
        assert_eq!(VirtualPath::new("movies/a").as_str(), "/movies/a");
        assert_eq!(VirtualPath::new("/movies/../tv/").as_str(), "/tv");
        assert_eq!(VirtualPath::new("").as_str(), "/");
        assert_eq!(VirtualPath::new("/../..").as_str(), "/");
    }

    #[test]
    fn test_virtual_path_parent_and_base() {
        let vp = VirtualPath::new("/x/y/f");
        assert_eq!(vp.parent().as_str(), "/x/y");
        assert_eq!(vp.base_name(), "f");
        assert_eq!(VirtualPath::new("/x").parent(), VirtualPath::root());
        assert_eq!(VirtualPath::root().parent(), VirtualPath::root());
    }

    #[test]
    fn test_virtual_path_reserved() {
        assert!(VirtualPath::new("/_UNSORTED").is_reserved());
        assert!(VirtualPath::new("/_UNSORTED/a").is_reserved());
        assert!(!VirtualPath::new("/x/_UNSORTED").is_reserved());
        assert!(!VirtualPath::root().is_reserved());
    }

    #[test]
    fn test_child_name_in() {
        let dir = VirtualPath::new("/x");
        assert_eq!(VirtualPath::new("/x/f").child_name_in(&dir), Some("f"));
        assert_eq!(VirtualPath::new("/x/y/f").child_name_in(&dir), None);
        assert_eq!(VirtualPath::new("/xy").child_name_in(&dir), None);
        assert_eq!(dir.child_name_in(&dir), None);
        assert_eq!(dir.child_name_in(&VirtualPath::root()), Some("x"));
    }

    #[test]
    fn test_rebase() {
        let old = VirtualPath::new("/x");
        let new = VirtualPath::new("/y/x2");
        assert_eq!(
            VirtualPath::new("/x/a/f").rebase(&old, &new),
            Some(VirtualPath::new("/y/x2/a/f"))
        );
        assert_eq!(old.rebase(&old, &new), Some(new.clone()));
        assert_eq!(VirtualPath::new("/xa/f").rebase(&old, &new), None);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("ok.txt").is_ok());
        for bad in ["", ".", "..", "a/b"] {
            assert!(validate_name(bad).is_err(), "{:?} should be invalid", bad);
        }
    }

    proptest! {
        #[test]
        fn test_virtual_path_clean_is_idempotent(raw in "[a-z./]{0,24}") {
            let once = VirtualPath::new(&raw);
            let twice = VirtualPath::new(once.as_str());
            prop_assert_eq!(&once, &twice);
            prop_assert!(once.as_str().starts_with('/'));
            prop_assert!(!once.as_str().contains("//"));
        }

        #[test]
        fn test_source_path_never_escapes(raw in "[a-z./]{0,24}") {
            if let Ok(sp) = SourcePath::new(&raw) {
                prop_assert!(!sp.as_str().starts_with('/'));
                prop_assert!(sp.as_str().split('/').all(|c| c != ".." && c != "."));
                let again = SourcePath::new(sp.as_str()).unwrap();
                prop_assert_eq!(sp, again);
            }
        }
    }
}
