use std::path::{Path, PathBuf};
use std::sync::Arc;

use coffer_archive::{CliDriver, CompressionOptions, Entry, ExtractionOptions, LibraryBackend};
use coffer_params::{OperationMode, ParameterTable, Registry};
use tracing::debug;

use crate::error::Result;
use crate::job::Job;
use crate::runner::{Backend, archive_stem};
use crate::state::{ArchiveSummary, SharedState};
use crate::step::Plan;

/// An archive file and the backend that operates on it.
///
/// Every operation is a [`Job`]. Jobs created from one handle share its
/// password, header encryption setting and last listing, so a password given
/// during one job is reused by the next.
#[derive(Clone, Debug)]
pub struct Archive {
    path: PathBuf,
    backend: Backend,
    stem: String,
    state: SharedState,
}

impl Archive {
    /// Open `path` with the built-in format table matching its name.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_in(Registry::builtin(), path)
    }

    pub fn open_in(registry: &Registry, path: impl AsRef<Path>) -> Result<Self> {
        let table = registry.for_path(path.as_ref())?;
        Self::with_table(path, table)
    }

    pub fn with_table(path: impl AsRef<Path>, table: Arc<ParameterTable>) -> Result<Self> {
        Self::with_driver(path, CliDriver::new(table))
    }

    pub fn with_driver(path: impl AsRef<Path>, driver: CliDriver) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let stem = archive_stem(&path, driver.table().extension_match(&path));
        Ok(Self::from_parts(path, Backend::Cli(driver), stem))
    }

    /// Operate on `path` in process instead of through an executable.
    pub fn with_library(path: impl AsRef<Path>, backend: impl LibraryBackend + 'static) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let stem = archive_stem(&path, None);
        Ok(Self::from_parts(path, Backend::Library(Arc::new(backend)), stem))
    }

    fn from_parts(path: PathBuf, backend: Backend, stem: String) -> Self {
        debug!(archive = %path.display(), backend = ?backend, "archive opened");
        Self {
            path,
            backend,
            stem,
            state: SharedState::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format name of the backend, such as `7z` or `zip`.
    pub fn format(&self) -> String {
        self.backend.name()
    }

    pub fn supports(&self, mode: OperationMode) -> bool {
        match mode {
            OperationMode::Copy => {
                self.backend.supports(OperationMode::Extract) && self.backend.supports(OperationMode::Add)
            }
            OperationMode::Move => {
                self.backend.supports(OperationMode::Move)
                    || [OperationMode::Extract, OperationMode::Delete, OperationMode::Add]
                        .into_iter()
                        .all(|needed| self.backend.supports(needed))
            }
            mode => self.backend.supports(mode),
        }
    }

    /// What the last completed listing found. `listed` is false before the
    /// first listing and after any job that changed the contents.
    pub fn summary(&self) -> ArchiveSummary {
        self.state.lock().summary.clone()
    }

    pub fn password(&self) -> Option<String> {
        self.state.lock().password.clone()
    }

    pub fn set_password(&self, password: Option<String>) {
        self.state.lock().password = password;
    }

    /// Encrypt added files with `password`, and the file list too when
    /// `header` is set and the format can.
    pub fn encrypt(&self, password: impl Into<String>, header: bool) {
        let mut state = self.state.lock();
        state.password = Some(password.into());
        state.encrypt_header = header;
    }

    /// Keep reading damaged archives without asking.
    pub fn set_ignore_corrupt(&self, ignore: bool) {
        self.state.lock().ignore_corrupt = ignore;
    }

    fn job(&self, plan: Plan) -> Job {
        Job::new(
            plan,
            self.path.clone(),
            self.backend.clone(),
            self.state.clone(),
            self.stem.clone(),
        )
    }

    pub fn list(&self) -> Job {
        self.job(Plan::List)
    }

    /// Extract `entries`, or everything when empty, into `destination`.
    pub fn extract(&self, entries: &[Entry], destination: impl Into<PathBuf>, options: ExtractionOptions) -> Job {
        self.job(Plan::Extract {
            entries: entries.to_vec(),
            destination: destination.into(),
            options,
        })
    }

    /// Extract everything, listing first if this handle has not. With
    /// `auto_subfolder`, archives holding more than one top-level entry are
    /// extracted into a new folder named after the archive.
    pub fn batch_extract(&self, destination: impl Into<PathBuf>, auto_subfolder: bool, options: ExtractionOptions) -> Job {
        self.job(Plan::BatchExtract {
            destination: destination.into(),
            auto_subfolder,
            options,
        })
    }

    /// Add files from disk under the in-archive directory `destination`
    /// (the root when empty). Relative paths resolve against
    /// [`CompressionOptions::global_work_dir`].
    pub fn add<P: Into<PathBuf>>(
        &self,
        paths: impl IntoIterator<Item = P>,
        destination: impl Into<String>,
        options: CompressionOptions,
    ) -> Job {
        self.job(Plan::Add {
            paths: paths.into_iter().map(Into::into).collect(),
            destination: destination.into(),
            options,
        })
    }

    pub fn move_entries(&self, entries: &[Entry], destination: impl Into<String>, options: CompressionOptions) -> Job {
        self.job(Plan::Move {
            entries: entries.to_vec(),
            destination: destination.into(),
            options,
        })
    }

    pub fn copy_entries(&self, entries: &[Entry], destination: impl Into<String>, options: CompressionOptions) -> Job {
        self.job(Plan::Copy {
            entries: entries.to_vec(),
            destination: destination.into(),
            options,
        })
    }

    pub fn delete(&self, entries: &[Entry]) -> Job {
        self.job(Plan::Delete {
            entries: entries.to_vec(),
        })
    }

    pub fn test(&self) -> Job {
        self.job(Plan::Test)
    }

    /// Replace the archive comment; empty text removes it.
    pub fn add_comment(&self, text: impl Into<String>) -> Job {
        self.job(Plan::Comment { text: text.into() })
    }
}

#[cfg(test)]
mod tests {
    use coffer_archive::ZipBackend;

    use super::*;

    #[test]
    fn library_archives_report_their_capabilities() {
        let archive = Archive::with_library("some/where.zip", ZipBackend).unwrap();
        assert!(archive.path().is_absolute());
        assert_eq!(archive.format(), "zip");
        assert!(archive.supports(OperationMode::List));
        assert!(!archive.supports(OperationMode::Move));
        assert!(!archive.supports(OperationMode::Copy));
    }

    #[test]
    fn password_is_shared_between_clones() {
        let archive = Archive::with_library("a.zip", ZipBackend).unwrap();
        let other = archive.clone();
        other.encrypt("hunter2", true);
        assert_eq!(archive.password().as_deref(), Some("hunter2"));
        archive.set_password(None);
        assert_eq!(other.password(), None);
    }

    #[test]
    fn jobs_start_in_created_state() {
        let archive = Archive::with_library("a.zip", ZipBackend).unwrap();
        let mut job = archive.list();
        assert_eq!(job.mode(), OperationMode::List);
        assert_eq!(job.state(), crate::JobState::Created);
        assert!(job.events().is_some());
        assert!(job.events().is_none());
    }
}
