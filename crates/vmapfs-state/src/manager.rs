//! Load/save lifecycle for the JSON state file.
//!
//! Every save first copies the current file into a sibling backup
//! directory, rotates old backups, then replaces the state file through a
//! temporary sibling and a rename. The manager has its own lock so disk
//! I/O never needs the filesystem-wide namespace lock to be re-entered.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, StateError};
use crate::types::{FsState, StateSnapshot};

/// Name of the backup directory created next to the state file.
pub const BACKUP_DIR_NAME: &str = ".vmapfs-backups";

/// Number of backups kept after rotation.
pub const BACKUP_COUNT: usize = 5;

const STATE_FILE_MODE: u32 = 0o600;

/// Owns the on-disk state file and its backup directory.
pub struct StateManager {
    state_path: PathBuf,
    backup_dir: PathBuf,
    backup_count: usize,
    io_lock: Mutex<()>,
}

impl StateManager {
    /// Prepares the state location: resolves `state_path` against the
    /// working directory, creates its parent and the backup directory, and
    /// checks that the state file can be created.
    pub fn new(state_path: impl AsRef<Path>) -> Result<Self> {
        let state_path = state_path.as_ref();
        let abs_path = if state_path.is_absolute() {
            state_path.to_path_buf()
        } else {
            let cwd = std::env::current_dir().map_err(|source| StateError::Setup {
                path: state_path.to_path_buf(),
                source,
            })?;
            cwd.join(state_path)
        };
        debug!(path = %abs_path.display(), "creating state manager");

        let state_dir = abs_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        fs::create_dir_all(&state_dir).map_err(|source| StateError::Setup {
            path: state_dir.clone(),
            source,
        })?;

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(STATE_FILE_MODE)
            .open(&abs_path)
            .map_err(|source| StateError::Setup {
                path: abs_path.clone(),
                source,
            })?;

        let backup_dir = state_dir.join(BACKUP_DIR_NAME);
        fs::create_dir_all(&backup_dir).map_err(|source| StateError::Setup {
            path: backup_dir.clone(),
            source,
        })?;

        info!(
            state = %abs_path.display(),
            backups = %backup_dir.display(),
            "state manager ready"
        );
        Ok(Self {
            state_path: abs_path,
            backup_dir,
            backup_count: BACKUP_COUNT,
            io_lock: Mutex::new(()),
        })
    }

    /// Absolute path of the state file.
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Directory holding timestamped backups.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Loads the state file, writing a fresh default state when the file is
    /// missing or empty. A file that fails to parse is a hard error.
    pub fn load(&self) -> Result<FsState> {
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        debug!(path = %self.state_path.display(), "loading state");

        let len = match fs::metadata(&self.state_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(StateError::Io(e)),
        };

        if len == 0 {
            info!("no valid state file, creating new state");
            let state = FsState::new();
            self.write_state(&state.snapshot())?;
            return Ok(state);
        }

        let data = fs::read(&self.state_path)?;
        debug!(bytes = data.len(), "parsing existing state file");
        let mut state: FsState =
            serde_json::from_slice(&data).map_err(|source| StateError::Parse {
                path: self.state_path.clone(),
                source,
            })?;
        state.directories.ensure_root();

        info!(
            mappings = state.mappings.len(),
            directories = state.directories.len(),
            "state loaded"
        );
        Ok(state)
    }

    /// Backs up the current file, rotates backups, and writes `snapshot`.
    ///
    /// A failed backup copy is logged and ignored; a failed rotation aborts
    /// the save before the state file is touched.
    pub fn save(&self, snapshot: &StateSnapshot<'_>) -> Result<()> {
        let _guard = self.io_lock.lock().unwrap_or_else(|e| e.into_inner());
        debug!(path = %self.state_path.display(), "saving state");

        match self.create_backup() {
            Ok(Some(_)) => {
                self.rotate_backups()?;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to create backup, continuing with save"),
        }

        self.write_state(snapshot)?;
        debug!("state saved and verified");
        Ok(())
    }

    fn write_state(&self, snapshot: &StateSnapshot<'_>) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        if data.is_empty() {
            return Err(StateError::EmptyPayload {
                path: self.state_path.clone(),
            });
        }
        trace!(bytes = data.len(), "writing state data");

        let tmp_path = self.state_path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(STATE_FILE_MODE)
                .open(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.state_path)?;

        let written = fs::metadata(&self.state_path)?.len();
        if written == 0 {
            return Err(StateError::VerifyFailed {
                path: self.state_path.clone(),
            });
        }
        Ok(())
    }

    /// Copies the current state file into the backup directory. Returns
    /// `None` when there is nothing to back up yet.
    fn create_backup(&self) -> Result<Option<PathBuf>> {
        let data = match fs::read(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };
        if data.is_empty() {
            return Ok(None);
        }

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.6f");
        let mut backup_path = self.backup_dir.join(format!("state-{}.json", stamp));
        let mut n = 1;
        while backup_path.exists() {
            backup_path = self.backup_dir.join(format!("state-{}-{}.json", stamp, n));
            n += 1;
        }

        debug!(path = %backup_path.display(), "creating backup");
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(STATE_FILE_MODE)
            .open(&backup_path)?;
        file.write_all(&data)?;
        Ok(Some(backup_path))
    }

    /// Deletes all but the newest `backup_count` backups, newest by mtime.
    fn rotate_backups(&self) -> Result<usize> {
        let mut backups: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            backups.push((path, modified));
        }

        backups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        let mut removed = 0;
        for (path, _) in backups.iter().skip(self.backup_count) {
            debug!(path = %path.display(), "removing old backup");
            fs::remove_file(path).map_err(|source| StateError::BackupRotation {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}
