use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::merge::{Conflict, MergeReport, merge_tree_until};

const HIDDEN_PREFIX: &str = ".coffer-";

/// Scratch directory owned by exactly one job.
///
/// The directory and everything below it is removed when the workspace is
/// dropped, whether the job succeeded, failed or was cancelled. A workspace
/// created with [`Workspace::hidden_in`] remembers its destination and can be
/// committed into it before being removed.
pub struct Workspace {
    dir: Option<TempDir>,
    destination: Option<PathBuf>,
}

impl Workspace {
    /// Create a workspace in the system temp directory.
    pub fn new(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| Error::Create {
                path: std::env::temp_dir(),
                source: e,
            })?;
        debug!(path = %dir.path().display(), "created workspace");
        Ok(Self {
            dir: Some(dir),
            destination: None,
        })
    }

    /// Create a workspace below `parent`.
    pub fn new_in(parent: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| Error::Create {
                path: parent.to_path_buf(),
                source: e,
            })?;
        debug!(path = %dir.path().display(), "created workspace");
        Ok(Self {
            dir: Some(dir),
            destination: None,
        })
    }

    /// Create a hidden workspace inside `destination`, to be merged into it
    /// with [`Workspace::commit`].
    ///
    /// Staging next to the destination keeps the final moves on one
    /// filesystem, so they are renames rather than copies.
    pub fn hidden_in(destination: impl AsRef<Path>) -> Result<Self> {
        let destination = destination.as_ref();
        std::fs::create_dir_all(destination).map_err(|e| Error::Create {
            path: destination.to_path_buf(),
            source: e,
        })?;
        let mut workspace = Self::new_in(destination, HIDDEN_PREFIX)?;
        workspace.destination = Some(destination.to_path_buf());
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Names of the immediate children of the workspace, sorted.
    pub fn top_level(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.path())? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Merge the staged tree into the destination, then remove the workspace.
    ///
    /// The workspace is removed even when the merge fails or is cancelled.
    pub fn commit<F>(self, resolve: F) -> Result<MergeReport>
    where
        F: FnMut(&Path) -> Conflict,
    {
        self.commit_until(resolve, || false)
    }

    /// [`Workspace::commit`] that gives up with [`Error::Cancelled`] once
    /// `interrupted` returns true, leaving the rest of the staged items
    /// unmerged.
    pub fn commit_until<F, I>(self, resolve: F, interrupted: I) -> Result<MergeReport>
    where
        F: FnMut(&Path) -> Conflict,
        I: Fn() -> bool,
    {
        let destination = self.destination.clone().ok_or(Error::NoDestination)?;
        let mut resolve = resolve;
        merge_tree_until(self.path(), &destination, &mut resolve, &interrupted)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(path = %path.display(), "removed workspace"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove workspace"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_removed_on_drop() {
        let path;
        {
            let workspace = Workspace::new("coffer-test-").unwrap();
            path = workspace.path().to_path_buf();
            std::fs::write(path.join("file.txt"), "data").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn hidden_workspace_lives_in_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");
        let workspace = Workspace::hidden_in(&dest).unwrap();
        assert!(workspace.path().starts_with(&dest));
        let name = workspace.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(HIDDEN_PREFIX));
        assert_eq!(workspace.destination(), Some(dest.as_path()));
    }

    #[test]
    fn commit_moves_files_and_removes_workspace() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");
        let workspace = Workspace::hidden_in(&dest).unwrap();
        let staging = workspace.path().to_path_buf();
        std::fs::create_dir_all(staging.join("sub")).unwrap();
        std::fs::write(staging.join("sub/file.txt"), "data").unwrap();

        let report = workspace.commit(|_| Conflict::Skip).unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("sub/file.txt")).unwrap(), "data");
        assert!(!staging.exists());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn commit_without_destination_fails() {
        let workspace = Workspace::new("coffer-test-").unwrap();
        let result = workspace.commit(|_| Conflict::Skip);
        assert!(matches!(result, Err(Error::NoDestination)));
    }

    #[test]
    fn top_level_is_sorted() {
        let workspace = Workspace::new("coffer-test-").unwrap();
        std::fs::write(workspace.path().join("b"), "").unwrap();
        std::fs::create_dir(workspace.path().join("a")).unwrap();
        assert_eq!(workspace.top_level().unwrap(), vec!["a", "b"]);
    }
}
