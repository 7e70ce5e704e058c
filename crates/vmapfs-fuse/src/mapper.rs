//! Bidirectional source ↔ virtual index.
//!
//! The primary table is keyed by source path and owns both the placement
//! and the extended attributes, so attributes survive unplace/replace
//! cycles. A secondary index (virtual → source) is rebuilt on load and
//! kept in lockstep on every mutation; it is what enforces that a virtual
//! path holds at most one file.
//!
//! The mapper does no locking. Callers hold the filesystem-wide lock.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use vmapfs_state::FileMapping;
use walkdir::WalkDir;

use crate::error::{Result, VfsError};
use crate::path::{SourcePath, VirtualPath};

pub const MAX_XATTR_NAME_LEN: usize = 255;
pub const MAX_XATTR_VALUE_LEN: usize = 65536;

pub struct PathMapper {
    source_root: PathBuf,
    mappings: BTreeMap<String, FileMapping>,
    by_virtual: HashMap<String, String>,
}

impl PathMapper {
    pub fn new(source_root: impl Into<PathBuf>, loaded: BTreeMap<String, FileMapping>) -> Self {
        let source_root = source_root.into();
        let mut mappings: BTreeMap<String, FileMapping> = BTreeMap::new();
        let mut by_virtual: HashMap<String, String> = HashMap::new();

        // Hand-edited files may carry keys such as `./a/b` or placements
        // without a leading slash.
        for (raw, mut mapping) in loaded {
            let source = match SourcePath::new(&raw) {
                Ok(sp) if !sp.is_root() => sp.as_str().to_string(),
                _ => {
                    warn!(source = %raw, "dropping mapping with invalid source path");
                    continue;
                }
            };
            if mapping.is_placed() {
                let normalized = VirtualPath::new(&mapping.virtual_path);
                if normalized.is_root() || normalized.is_reserved() {
                    warn!(
                        source = %source,
                        virtual_path = %mapping.virtual_path,
                        "unplacing mapping with unusable virtual path"
                    );
                    mapping.virtual_path.clear();
                } else {
                    mapping.virtual_path = normalized.as_str().to_string();
                }
            }
            if mappings.contains_key(&source) {
                warn!(
                    source = %source,
                    raw = %raw,
                    "dropping mapping that normalizes onto an existing source"
                );
                continue;
            }
            mappings.insert(source, mapping);
        }

        // BTreeMap order makes duplicate resolution deterministic: the
        // lexically smallest source path keeps the virtual path and the
        // others go back to the unsorted view.
        for (source, mapping) in mappings.iter_mut() {
            if !mapping.is_placed() {
                continue;
            }
            if let Some(winner) = by_virtual.get(&mapping.virtual_path) {
                warn!(
                    virtual_path = %mapping.virtual_path,
                    kept = %winner,
                    unplaced = %source,
                    "duplicate placement in loaded state"
                );
                mapping.virtual_path.clear();
                continue;
            }
            by_virtual.insert(mapping.virtual_path.clone(), source.clone());
        }
        debug!(
            root = %source_root.display(),
            mappings = mappings.len(),
            placed = by_virtual.len(),
            "path mapper ready"
        );
        Self {
            source_root,
            mappings,
            by_virtual,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// The full table, for persistence.
    pub fn table(&self) -> &BTreeMap<String, FileMapping> {
        &self.mappings
    }

    pub fn placed_count(&self) -> usize {
        self.by_virtual.len()
    }

    /// True only when a mapping exists and carries a virtual path.
    pub fn is_mapped(&self, source: &SourcePath) -> bool {
        let mapped = self
            .mappings
            .get(source.as_str())
            .is_some_and(FileMapping::is_placed);
        trace!(source = %source, mapped, "is_mapped");
        mapped
    }

    pub fn virtual_path_of(&self, source: &SourcePath) -> Option<VirtualPath> {
        self.mappings
            .get(source.as_str())
            .filter(|m| m.is_placed())
            .map(|m| VirtualPath::new(&m.virtual_path))
    }

    pub fn source_path_of(&self, virtual_path: &VirtualPath) -> Option<SourcePath> {
        let source = self.by_virtual.get(virtual_path.as_str())?;
        SourcePath::new(source).ok()
    }

    /// Places `source` at `virtual_path`, keeping any attributes it has.
    ///
    /// Returns `Ok(false)` without changing anything when the source is
    /// missing or not a regular file. Fails with `AlreadyExists` when a
    /// different source is already placed at `virtual_path`.
    pub fn add_mapping(&mut self, virtual_path: &VirtualPath, source: &SourcePath) -> Result<bool> {
        let full = source.resolve(&self.source_root);
        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                warn!(source = %source, "rejecting placement of non-regular file");
                return Ok(false);
            }
            Err(e) => {
                warn!(path = %full.display(), error = %e, "cannot stat source path");
                return Ok(false);
            }
        }

        if let Some(holder) = self.by_virtual.get(virtual_path.as_str()) {
            if holder != source.as_str() {
                return Err(VfsError::AlreadyExists {
                    path: virtual_path.to_string(),
                });
            }
        }

        debug!(virtual_path = %virtual_path, source = %source, "adding mapping");
        let mapping = self.mappings.entry(source.as_str().to_string()).or_default();
        if mapping.is_placed() {
            self.by_virtual.remove(&mapping.virtual_path);
        }
        mapping.virtual_path = virtual_path.as_str().to_string();
        self.by_virtual
            .insert(virtual_path.as_str().to_string(), source.as_str().to_string());
        Ok(true)
    }

    /// Clears the placement at `virtual_path`. The mapping row and its
    /// attributes stay.
    pub fn remove_mapping(&mut self, virtual_path: &VirtualPath) -> Option<SourcePath> {
        let source = self.by_virtual.remove(virtual_path.as_str())?;
        debug!(virtual_path = %virtual_path, source = %source, "removing mapping");
        if let Some(mapping) = self.mappings.get_mut(&source) {
            mapping.virtual_path.clear();
        }
        SourcePath::new(&source).ok()
    }

    /// True if any placed file lives below `dir`.
    pub fn has_placed_under(&self, dir: &VirtualPath) -> bool {
        self.by_virtual
            .keys()
            .any(|vp| VirtualPath::new(vp).is_within(dir))
    }

    /// Names of placed files that are immediate children of `dir`.
    pub fn placed_children(&self, dir: &VirtualPath) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_virtual
            .keys()
            .filter_map(|vp| {
                VirtualPath::new(vp)
                    .child_name_in(dir)
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }

    /// Moves every placement below `old` to the same suffix below `new`.
    /// Returns how many placements moved.
    pub fn rewrite_prefix(&mut self, old: &VirtualPath, new: &VirtualPath) -> usize {
        let moved: Vec<(String, VirtualPath)> = self
            .by_virtual
            .keys()
            .filter_map(|vp| {
                VirtualPath::new(vp)
                    .strip_dir_prefix(old)
                    .map(|rest| (vp.clone(), new.join(rest)))
            })
            .collect();

        let mut rebased = Vec::with_capacity(moved.len());
        for (old_vp, _) in &moved {
            if let Some(source) = self.by_virtual.remove(old_vp) {
                rebased.push(source);
            }
        }
        for ((old_vp, new_vp), source) in moved.iter().zip(rebased) {
            trace!(from = %old_vp, to = %new_vp, "rebasing mapping");
            if let Some(mapping) = self.mappings.get_mut(&source) {
                mapping.virtual_path = new_vp.as_str().to_string();
            }
            self.by_virtual.insert(new_vp.as_str().to_string(), source);
        }
        moved.len()
    }

    pub fn xattrs(&self, source: &SourcePath) -> Option<&BTreeMap<String, Vec<u8>>> {
        self.mappings.get(source.as_str()).map(|m| &m.xattrs)
    }

    pub fn get_xattr(&self, source: &SourcePath, name: &str) -> Option<&[u8]> {
        self.xattrs(source)?.get(name).map(Vec::as_slice)
    }

    /// Sets an attribute, creating an unplaced mapping row if needed.
    pub fn set_xattr(&mut self, source: &SourcePath, name: &str, value: &[u8]) -> Result<()> {
        if name.is_empty() {
            return Err(VfsError::invalid("xattr name cannot be empty"));
        }
        if name.len() > MAX_XATTR_NAME_LEN {
            return Err(VfsError::invalid(format!(
                "xattr name exceeds maximum length of {}",
                MAX_XATTR_NAME_LEN
            )));
        }
        if value.len() > MAX_XATTR_VALUE_LEN {
            return Err(VfsError::invalid(format!(
                "xattr value exceeds maximum length of {}",
                MAX_XATTR_VALUE_LEN
            )));
        }
        debug!(source = %source, name, "setting xattr");
        self.mappings
            .entry(source.as_str().to_string())
            .or_default()
            .xattrs
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    pub fn remove_xattr(&mut self, source: &SourcePath, name: &str) -> Result<()> {
        debug!(source = %source, name, "removing xattr");
        let removed = self
            .mappings
            .get_mut(source.as_str())
            .and_then(|m| m.xattrs.remove(name));
        match removed {
            Some(_) => Ok(()),
            None => Err(VfsError::NoAttribute {
                name: name.to_string(),
            }),
        }
    }

    /// Attribute names of `source`, sorted.
    pub fn list_xattrs(&self, source: &SourcePath) -> Vec<String> {
        self.xattrs(source)
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every source entry (files and directories) that is not placed.
    /// Special files are skipped.
    ///
    /// Walks the whole source tree on each call.
    pub fn unmapped_source_paths(&self) -> Result<Vec<SourcePath>> {
        debug!("finding unmapped source paths");
        let mut unmapped = Vec::new();
        for entry in WalkDir::new(&self.source_root)
            .min_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            let source = match SourcePath::from_fs_path(&self.source_root, entry.path()) {
                Ok(sp) => sp,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping source entry");
                    continue;
                }
            };
            let kind = match entry.path().metadata() {
                Ok(meta) => meta.file_type(),
                Err(_) => entry.file_type(),
            };
            if !(kind.is_file() || kind.is_dir()) {
                continue;
            }
            if !self.is_mapped(&source) {
                unmapped.push(source);
            }
        }
        debug!(count = unmapped.len(), "unmapped source paths");
        Ok(unmapped)
    }
}
