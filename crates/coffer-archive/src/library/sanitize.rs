use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve an archive entry path below `base`, rejecting absolute paths and
/// `..` sequences that would escape it.
pub fn sanitize_path(entry: &str, base: &Path) -> Result<PathBuf> {
    let entry_path = Path::new(entry);
    let mut relative = PathBuf::new();

    for component in entry_path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(Error::ZipSlip {
                        entry: entry_path.to_path_buf(),
                        resolved: base.join(entry_path),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::ZipSlip {
                    entry: entry_path.to_path_buf(),
                    resolved: entry_path.to_path_buf(),
                });
            }
        }
    }

    Ok(base.join(relative))
}
