use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// Decision for one conflicting destination path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    Overwrite,
    Skip,
    /// Place the item next to the conflicting one under this file name.
    Rename(String),
    Cancel,
}

/// What happened to the staged items during a merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub moved: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Move everything below `src` into `dest`.
///
/// Directories present on both sides are merged recursively; every other
/// collision is handed to `resolve` exactly once per destination path.
/// Children are visited in name order so the sequence of questions is stable.
pub fn merge_tree<F>(src: &Path, dest: &Path, resolve: &mut F) -> Result<MergeReport>
where
    F: FnMut(&Path) -> Conflict,
{
    merge_tree_until(src, dest, resolve, &|| false)
}

/// [`merge_tree`] that stops with [`Error::Cancelled`] before the next item
/// once `interrupted` returns true.
pub fn merge_tree_until<F>(
    src: &Path,
    dest: &Path,
    resolve: &mut F,
    interrupted: &dyn Fn() -> bool,
) -> Result<MergeReport>
where
    F: FnMut(&Path) -> Conflict,
{
    let mut report = MergeReport::default();
    fs::create_dir_all(dest)?;
    merge_dir(src, dest, resolve, interrupted, &mut report)?;
    Ok(report)
}

fn merge_dir<F>(
    src: &Path,
    dest: &Path,
    resolve: &mut F,
    interrupted: &dyn Fn() -> bool,
    report: &mut MergeReport,
) -> Result<()>
where
    F: FnMut(&Path) -> Conflict,
{
    let mut children: Vec<_> = fs::read_dir(src)?.collect::<std::io::Result<_>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let from = child.path();
        let is_dir = child.file_type()?.is_dir();
        let mut target = dest.join(child.file_name());
        if interrupted() {
            return Err(Error::Cancelled { path: target });
        }

        loop {
            let existing = match fs::symlink_metadata(&target) {
                Ok(meta) => meta,
                Err(_) => {
                    move_item(&from, &target)?;
                    report.moved.push(target);
                    break;
                }
            };

            if is_dir && existing.is_dir() {
                merge_dir(&from, &target, resolve, interrupted, report)?;
                break;
            }

            match resolve(&target) {
                Conflict::Overwrite => {
                    remove_item(&target, existing.is_dir())?;
                    move_item(&from, &target)?;
                    report.moved.push(target);
                    break;
                }
                Conflict::Skip => {
                    debug!(path = %target.display(), "skipped conflicting path");
                    report.skipped.push(target);
                    break;
                }
                Conflict::Rename(name) => {
                    target = target.with_file_name(name);
                }
                Conflict::Cancel => return Err(Error::Cancelled { path: target }),
            }
        }
    }

    Ok(())
}

fn move_item(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(from, to).map_err(|e| Error::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

fn remove_item(path: &Path, is_dir: bool) -> Result<()> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| Error::Remove {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dest).unwrap();
        (dir, src, dest)
    }

    #[test]
    fn moves_into_empty_destination() {
        let (_dir, src, dest) = setup();
        fs::create_dir(src.join("a")).unwrap();
        fs::write(src.join("a/x"), "x").unwrap();
        fs::write(src.join("b"), "b").unwrap();

        let mut asked = 0;
        let report = merge_tree(&src, &dest, &mut |_| {
            asked += 1;
            Conflict::Skip
        })
        .unwrap();

        assert_eq!(asked, 0);
        assert_eq!(report.moved.len(), 2);
        assert_eq!(fs::read_to_string(dest.join("a/x")).unwrap(), "x");
    }

    #[test]
    fn merges_directories_and_asks_per_file() {
        let (_dir, src, dest) = setup();
        fs::create_dir_all(src.join("a")).unwrap();
        fs::write(src.join("a/x"), "new").unwrap();
        fs::write(src.join("a/y"), "new").unwrap();
        fs::create_dir_all(dest.join("a")).unwrap();
        fs::write(dest.join("a/x"), "old").unwrap();

        let mut asked = Vec::new();
        merge_tree(&src, &dest, &mut |path| {
            asked.push(path.to_path_buf());
            Conflict::Overwrite
        })
        .unwrap();

        assert_eq!(asked, vec![dest.join("a/x")]);
        assert_eq!(fs::read_to_string(dest.join("a/x")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dest.join("a/y")).unwrap(), "new");
    }

    #[test]
    fn skip_keeps_existing_file() {
        let (_dir, src, dest) = setup();
        fs::write(src.join("f"), "new").unwrap();
        fs::write(dest.join("f"), "old").unwrap();

        let report = merge_tree(&src, &dest, &mut |_| Conflict::Skip).unwrap();

        assert_eq!(report.skipped, vec![dest.join("f")]);
        assert_eq!(fs::read_to_string(dest.join("f")).unwrap(), "old");
    }

    #[test]
    fn rename_places_item_under_new_name() {
        let (_dir, src, dest) = setup();
        fs::write(src.join("f"), "new").unwrap();
        fs::write(dest.join("f"), "old").unwrap();

        merge_tree(&src, &dest, &mut |_| Conflict::Rename("f (1)".into())).unwrap();

        assert_eq!(fs::read_to_string(dest.join("f")).unwrap(), "old");
        assert_eq!(fs::read_to_string(dest.join("f (1)")).unwrap(), "new");
    }

    #[test]
    fn cancel_stops_merge() {
        let (_dir, src, dest) = setup();
        fs::write(src.join("a"), "new").unwrap();
        fs::write(src.join("b"), "new").unwrap();
        fs::write(dest.join("a"), "old").unwrap();

        let result = merge_tree(&src, &dest, &mut |_| Conflict::Cancel);

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert!(!dest.join("b").exists());
    }

    #[test]
    fn interruption_stops_before_next_item() {
        let (_dir, src, dest) = setup();
        for name in ["a", "b", "c"] {
            fs::write(src.join(name), name).unwrap();
        }

        let moved = std::cell::Cell::new(0);
        let result = merge_tree_until(
            &src,
            &dest,
            &mut |_| Conflict::Overwrite,
            &|| {
                moved.set(moved.get() + 1);
                moved.get() > 1
            },
        );

        assert!(matches!(result, Err(Error::Cancelled { path }) if path == dest.join("b")));
        assert!(dest.join("a").exists());
        assert!(!dest.join("b").exists());
        assert!(src.join("c").exists());
    }
}
