use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::error::{Result, VfsError};

/// An open, read-only source file.
///
/// Reads are positioned, so the handle keeps no cursor. The mutex only
/// guards against a read racing a release.
pub struct FileHandle {
    file: Mutex<Option<File>>,
    label: String,
    direct_io: bool,
}

impl FileHandle {
    pub(crate) fn new(file: File, label: impl Into<String>, direct_io: bool) -> Self {
        Self {
            file: Mutex::new(Some(file)),
            label: label.into(),
            direct_io,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when page-cache data must not be used for this handle.
    pub fn direct_io(&self) -> bool {
        self.direct_io
    }

    /// Reads up to `size` bytes at `offset`. Fewer bytes come back only at
    /// end of file.
    pub fn read_at(&self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let guard = self.file.lock().map_err(|_| VfsError::LockPoisoned)?;
        let file = guard
            .as_ref()
            .ok_or_else(|| VfsError::invalid(format!("{} is already released", self.label)))?;

        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(VfsError::Io(e)),
            }
        }
        buf.truncate(filled);
        trace!(path = %self.label, offset, requested = size, read = filled, "read");
        Ok(buf)
    }

    /// Closes the descriptor. Releasing twice is an error.
    pub fn release(&self) -> Result<()> {
        let mut guard = self.file.lock().map_err(|_| VfsError::LockPoisoned)?;
        match guard.take() {
            Some(file) => {
                drop(file);
                debug!(path = %self.label, "released handle");
                Ok(())
            }
            None => Err(VfsError::invalid(format!(
                "{} is already released",
                self.label
            ))),
        }
    }
}
