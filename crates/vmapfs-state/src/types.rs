//! On-disk state types.
//!
//! The JSON layout is:
//!
//! ```text
//! { "mappings": { "<source-relative-path>": { "virtual_path": "...", "xattrs": { "<name>": "<base64>" } } },
//!   "directories": { "/": true, "/movies": true },
//!   "version": 1 }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Current schema version written by this crate.
pub const STATE_VERSION: u32 = 1;

/// Virtual path of the namespace root. Always present in the directory set.
pub const ROOT_DIR: &str = "/";

/// Placement and attributes of a single source path.
///
/// An empty `virtual_path` means the source is not placed but may still
/// carry attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    #[serde(default)]
    pub virtual_path: String,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        with = "xattr_encoding"
    )]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl FileMapping {
    pub fn placed_at(virtual_path: impl Into<String>) -> Self {
        Self {
            virtual_path: virtual_path.into(),
            xattrs: BTreeMap::new(),
        }
    }

    pub fn is_placed(&self) -> bool {
        !self.virtual_path.is_empty()
    }
}

/// Set of user-created virtual directories, serialized as `{ "<path>": true }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySet(BTreeSet<String>);

impl DirectorySet {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(ROOT_DIR.to_string());
        Self(dirs)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.0.insert(path.into())
    }

    /// Removes a directory. The root is never removed.
    pub fn remove(&mut self, path: &str) -> bool {
        if path == ROOT_DIR {
            return false;
        }
        self.0.remove(path)
    }

    pub fn ensure_root(&mut self) {
        self.0.insert(ROOT_DIR.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DirectorySet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<String> for DirectorySet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self(iter.into_iter().collect());
        set.ensure_root();
        set
    }
}

impl Serialize for DirectorySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for dir in &self.0 {
            map.serialize_entry(dir, &true)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DirectorySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<BTreeMap<String, bool>> = Option::deserialize(deserializer)?;
        let dirs = raw
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(path, _)| path)
            .collect();
        Ok(Self(dirs))
    }
}

/// The full persisted record, as loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsState {
    #[serde(default, deserialize_with = "nullable")]
    pub mappings: BTreeMap<String, FileMapping>,
    #[serde(default)]
    pub directories: DirectorySet,
    #[serde(default = "default_version")]
    pub version: u32,
}

impl FsState {
    pub fn new() -> Self {
        Self {
            mappings: BTreeMap::new(),
            directories: DirectorySet::new(),
            version: STATE_VERSION,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            mappings: &self.mappings,
            directories: &self.directories,
            version: self.version,
        }
    }
}

impl Default for FsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed view of the state, used to serialize without cloning the
/// in-memory tables owned by the filesystem.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StateSnapshot<'a> {
    pub mappings: &'a BTreeMap<String, FileMapping>,
    pub directories: &'a DirectorySet,
    pub version: u32,
}

fn default_version() -> u32 {
    STATE_VERSION
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Attribute values are byte strings; JSON carries them base64-encoded.
mod xattr_encoding {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(
        attrs: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(attrs.len()))?;
        for (name, value) in attrs {
            map.serialize_entry(name, &STANDARD.encode(value))?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let raw: Option<BTreeMap<String, Option<String>>> = Option::deserialize(deserializer)?;
        let mut attrs = BTreeMap::new();
        for (name, value) in raw.unwrap_or_default() {
            let bytes = match value {
                Some(encoded) => STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| D::Error::custom(format!("xattr {}: {}", name, e)))?,
                None => Vec::new(),
            };
            attrs.insert(name, bytes);
        }
        Ok(attrs)
    }
}
