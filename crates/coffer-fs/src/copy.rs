use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Copy `src` to `dst`, recursing into directories. Symbolic links are
/// recreated rather than followed.
pub fn copy_tree(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let failed = |source| Error::Copy {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source,
    };

    let meta = fs::symlink_metadata(src).map_err(failed)?;
    if meta.is_dir() {
        fs::create_dir_all(dst).map_err(failed)?;
        for entry in fs::read_dir(src).map_err(failed)? {
            let entry = entry.map_err(failed)?;
            copy_tree(entry.path(), dst.join(entry.file_name()))?;
        }
    } else if meta.file_type().is_symlink() {
        copy_link(src, dst).map_err(failed)?;
    } else {
        fs::copy(src, dst).map_err(failed)?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_link(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::copy(src, dst).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_nested_directories() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::write(src.join("sub/inner.txt"), "inner").unwrap();

        let dst = dir.path().join("out/copy");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
        assert_eq!(fs::read_to_string(dst.join("sub/inner.txt")).unwrap(), "inner");
        assert!(src.join("sub/inner.txt").exists());
    }

    #[test]
    fn missing_source_names_both_paths() {
        let dir = tempdir().unwrap();
        let err = copy_tree(dir.path().join("gone"), dir.path().join("to")).unwrap_err();
        assert!(matches!(err, Error::Copy { ref from, .. } if from.ends_with("gone")));
    }

    #[cfg(unix)]
    #[test]
    fn links_are_recreated() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        std::os::unix::fs::symlink("elsewhere", src.join("link")).unwrap();

        copy_tree(&src, dir.path().join("dst")).unwrap();
        assert_eq!(
            fs::read_link(dir.path().join("dst/link")).unwrap(),
            Path::new("elsewhere")
        );
    }
}
