use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::{Error, Result};

// The working directory is process-wide; guards are serialized so that two
// jobs never interleave their changes.
static WORKING_DIR: Mutex<()> = Mutex::new(());

/// Changes the process working directory and restores the previous one on
/// drop.
///
/// Holding the guard blocks other guards, so it belongs on a worker thread,
/// never across an `.await`.
pub struct WorkingDirGuard {
    previous: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkingDirGuard {
    pub fn change_to(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let lock = WORKING_DIR.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = std::env::current_dir()?;
        std::env::set_current_dir(path).map_err(|e| Error::ChangeDir {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(from = %previous.display(), to = %path.display(), "changed working directory");
        Ok(Self {
            previous,
            _lock: lock,
        })
    }

    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        match std::env::set_current_dir(&self.previous) {
            Ok(()) => debug!(to = %self.previous.display(), "restored working directory"),
            Err(e) => warn!(
                to = %self.previous.display(),
                error = %e,
                "failed to restore working directory"
            ),
        }
    }
}
