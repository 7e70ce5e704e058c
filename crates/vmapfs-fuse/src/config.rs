use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attr::Identity;
use crate::mount::{parse_mount_options, MountOptions};

/// Startup settings, read from a `.toml`/`.json` file and then overridden
/// by command-line flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmapConfig {
    pub mount: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub options: String,
    pub attr_ttl_secs: u64,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub verbose: bool,
}

impl Default for VmapConfig {
    fn default() -> Self {
        Self {
            mount: None,
            source: None,
            state: None,
            options: String::new(),
            attr_ttl_secs: 1,
            uid: None,
            gid: None,
            verbose: false,
        }
    }
}

/// A validated configuration, ready to mount.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mount: PathBuf,
    pub source: PathBuf,
    pub state: PathBuf,
    pub options: MountOptions,
    pub attr_ttl: Duration,
    pub identity: Identity,
}

impl VmapConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: VmapConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: VmapConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Checks required settings and resolves options and identity.
    pub fn validate(&self) -> anyhow::Result<RunConfig> {
        let mount = self
            .mount
            .clone()
            .ok_or_else(|| anyhow::anyhow!("mount point is required (--mount)"))?;
        let source = self
            .source
            .clone()
            .ok_or_else(|| anyhow::anyhow!("source directory is required (--source)"))?;
        let state = self
            .state
            .clone()
            .ok_or_else(|| anyhow::anyhow!("state file is required (--state)"))?;
        let options = parse_mount_options(&self.options)?;

        Ok(RunConfig {
            mount,
            source,
            state,
            options,
            attr_ttl: Duration::from_secs(self.attr_ttl_secs),
            identity: Identity::resolve(self.uid, self.gid),
        })
    }
}
