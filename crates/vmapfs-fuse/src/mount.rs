//! Mount option parsing and the background mount session.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::driver::VmapFuse;
use crate::filesystem::VmapFs;

/// Name reported as both fsname and subtype.
pub const FS_NAME: &str = "vmapfs";

/// Mount options accepted on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow other users to access.
    pub allow_other: bool,
    /// Allow root to access.
    pub allow_root: bool,
    /// Let the kernel check permission bits.
    pub default_permissions: bool,
    /// Unmount when the process exits.
    pub auto_unmount: bool,
    /// Allow mounting over a non-empty directory.
    pub nonempty: bool,
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Mount failed on {path}: {source}")]
    Mount {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }
    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }
    Ok(())
}

/// Parses a comma-separated option list. Unknown options are rejected.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();
    for opt in opts_str.split(',') {
        match opt.trim() {
            "allow_other" => options.allow_other = true,
            "allow_root" => options.allow_root = true,
            "default_permissions" => options.default_permissions = true,
            "auto_unmount" => options.auto_unmount = true,
            "nonempty" => options.nonempty = true,
            "" => {}
            other => return Err(MountError::InvalidOption(other.to_string())),
        }
    }
    Ok(options)
}

pub fn options_to_fuser(opts: &MountOptions) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![
        fuser::MountOption::FSName(FS_NAME.to_string()),
        fuser::MountOption::Subtype(FS_NAME.to_string()),
    ];
    if opts.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }
    if opts.allow_root {
        fuser_opts.push(fuser::MountOption::AllowRoot);
    }
    if opts.default_permissions {
        fuser_opts.push(fuser::MountOption::DefaultPermissions);
    }
    if opts.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }
    if opts.nonempty {
        fuser_opts.push(fuser::MountOption::CUSTOM("nonempty".into()));
    }
    fuser_opts
}

/// Mounts `fs` at `mountpoint` in a background session. Dropping the
/// session unmounts.
pub fn mount(
    fs: Arc<VmapFs>,
    mountpoint: &Path,
    options: &MountOptions,
    attr_ttl: Duration,
) -> Result<fuser::BackgroundSession, MountError> {
    validate_mountpoint(mountpoint)?;
    let fuser_opts = options_to_fuser(options);
    info!(mountpoint = %mountpoint.display(), options = ?options, "mounting");
    fuser::spawn_mount2(VmapFuse::new(fs, attr_ttl), mountpoint, &fuser_opts).map_err(|source| {
        MountError::Mount {
            path: mountpoint.display().to_string(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_options() {
        let opts = MountOptions::default();
        assert!(!opts.allow_other);
        assert!(!opts.auto_unmount);
    }

    #[test]
    fn test_parse_mount_options_multiple() {
        let opts = parse_mount_options("allow_other, default_permissions,nonempty").unwrap();
        assert!(opts.allow_other);
        assert!(opts.default_permissions);
        assert!(opts.nonempty);
        assert!(!opts.allow_root);
    }

    #[test]
    fn test_parse_mount_options_empty_returns_default() {
        assert_eq!(parse_mount_options("").unwrap(), MountOptions::default());
    }

    #[test]
    fn test_parse_mount_options_unknown_returns_error() {
        let result = parse_mount_options("allow_other,rw");
        assert!(matches!(result, Err(MountError::InvalidOption(ref o)) if o == "rw"));
    }

    #[test]
    fn test_options_to_fuser_always_names_filesystem() {
        let opts = options_to_fuser(&MountOptions::default());
        assert_eq!(opts.len(), 2);
        assert!(opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::FSName(n) if n == "vmapfs")));
        assert!(opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::Subtype(n) if n == "vmapfs")));
    }

    #[test]
    fn test_options_to_fuser_includes_all() {
        let opts = MountOptions {
            allow_other: true,
            allow_root: true,
            default_permissions: true,
            auto_unmount: true,
            nonempty: true,
        };
        let fuser_opts = options_to_fuser(&opts);
        assert_eq!(fuser_opts.len(), 7);
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AllowOther)));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AutoUnmount)));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::CUSTOM(c) if c == "nonempty")));
    }

    #[test]
    fn test_validate_mountpoint() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_mountpoint(dir.path()).is_ok());

        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            validate_mountpoint(&file),
            Err(MountError::NotADirectory(_))
        ));
        assert!(matches!(
            validate_mountpoint(&dir.path().join("missing")),
            Err(MountError::PathNotFound(_))
        ));
    }
}
