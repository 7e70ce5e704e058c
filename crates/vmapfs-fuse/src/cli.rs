use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::VmapConfig;

#[derive(Parser, Debug)]
#[command(name = "vmapfs")]
#[command(about = "Virtual namespace filesystem over an immutable source tree", long_about = None)]
pub struct Cli {
    /// Directory to mount on.
    #[arg(short, long, env = "VMAPFS_MOUNT")]
    pub mount: Option<PathBuf>,

    /// Source tree presented through the mount.
    #[arg(short, long, env = "VMAPFS_SOURCE")]
    pub source: Option<PathBuf>,

    /// JSON state file.
    #[arg(long, env = "VMAPFS_STATE")]
    pub state: Option<PathBuf>,

    /// Optional `.toml` or `.json` config file. Flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma-separated mount options.
    #[arg(short, long)]
    pub options: Option<String>,

    #[arg(long)]
    pub attr_ttl_secs: Option<u64>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Owner uid reported for every node.
    #[arg(long, env = "PUID")]
    pub uid: Option<u32>,

    /// Owner gid reported for every node.
    #[arg(long, env = "PGID")]
    pub gid: Option<u32>,
}

impl Cli {
    /// Loads the config file, if any, and applies the flags on top.
    pub fn into_config(self) -> Result<VmapConfig> {
        let mut config = match &self.config {
            Some(path) => VmapConfig::from_file(path)?,
            None => VmapConfig::default(),
        };
        if let Some(mount) = self.mount {
            config.mount = Some(mount);
        }
        if let Some(source) = self.source {
            config.source = Some(source);
        }
        if let Some(state) = self.state {
            config.state = Some(state);
        }
        if let Some(options) = self.options {
            config.options = options;
        }
        if let Some(ttl) = self.attr_ttl_secs {
            config.attr_ttl_secs = ttl;
        }
        if self.uid.is_some() {
            config.uid = self.uid;
        }
        if self.gid.is_some() {
            config.gid = self.gid;
        }
        config.verbose |= self.verbose;
        Ok(config)
    }
}
