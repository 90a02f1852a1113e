use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use coffer_params::OperationMode;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use super::sanitize::sanitize_path;
use super::{LibraryBackend, LibraryContext};
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::event::{ArchiveEvent, ArchiveInfo};
use crate::options::ExtractionOptions;
use crate::query::OverwriteChoice;

/// Read-only zip support through the `zip` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipBackend;

fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
        ZipError::InvalidArchive(_) => Error::Corrupt(e.to_string()),
        e => Error::Zip(e),
    })
}

/// Render a unix mode the way `ls -l` does.
fn format_mode(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn wanted(files: &[String], name: &str) -> bool {
    files.is_empty()
        || files
            .iter()
            .any(|f| f == name || (f.ends_with('/') && name.starts_with(f.as_str())))
}

/// Open entry `index` for reading, asking for a password as long as the
/// stored one is missing or wrong.
fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    ctx: &mut LibraryContext,
    index: usize,
    mut read: impl FnMut(&mut dyn Read) -> Result<()>,
) -> Result<()> {
    if !archive.by_index_raw(index)?.encrypted() {
        let mut file = archive.by_index(index)?;
        return read(&mut file);
    }

    let mut retry = false;
    loop {
        let password = match ctx.password.clone() {
            Some(password) => password,
            None => ctx.request_password(retry)?,
        };
        match archive.by_index_decrypt(index, password.as_bytes()) {
            Ok(mut file) => return read(&mut file),
            Err(ZipError::InvalidPassword) => {
                warn!(archive = %ctx.archive.display(), "wrong password");
                ctx.password = None;
                retry = true;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Final target for an extracted file, consulting the overwrite policy when
/// something is already there. `None` means skip.
fn resolve_target(ctx: &LibraryContext, mut target: PathBuf, name: &str, multiple: bool) -> Result<Option<PathBuf>> {
    while target.exists() {
        let choice = ctx
            .overwrite
            .resolve_blocking(ctx.queries(), name.to_string(), multiple, &ctx.cancel);
        match choice {
            OverwriteChoice::Overwrite | OverwriteChoice::OverwriteAll => return Ok(Some(target)),
            OverwriteChoice::Skip | OverwriteChoice::AutoSkip => return Ok(None),
            OverwriteChoice::Rename(new_name) => target = target.with_file_name(new_name),
            OverwriteChoice::Cancel => return Err(Error::Cancelled),
        }
    }
    Ok(Some(target))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode.map(|m| m & 0o777).filter(|m| *m != 0) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o200))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

impl LibraryBackend for ZipBackend {
    fn name(&self) -> &str {
        "zip"
    }

    fn supports(&self, mode: OperationMode) -> bool {
        matches!(
            mode,
            OperationMode::List | OperationMode::Extract | OperationMode::Test
        )
    }

    fn list(&self, ctx: &mut LibraryContext) -> Result<()> {
        let mut archive = open(&ctx.archive)?;
        let total = archive.len();
        let mut info = ArchiveInfo {
            archive_type: Some("zip".into()),
            ..Default::default()
        };
        let comment = String::from_utf8_lossy(archive.comment()).trim().to_string();
        if !comment.is_empty() {
            info.comment = Some(comment);
        }

        for index in 0..total {
            ctx.check_cancelled()?;
            let file = archive.by_index_raw(index)?;
            let mut entry = Entry::file(file.name(), file.size());
            entry.is_dir = file.is_dir();
            entry.compressed_size = Some(file.compressed_size());
            entry.checksum = Some(format!("{:08X}", file.crc32()));
            entry.method = Some(format!("{:?}", file.compression()));
            entry.encrypted = file.encrypted();
            entry.permissions = file.unix_mode().map(format_mode);
            if !file.comment().is_empty() {
                entry.comment = Some(file.comment().to_string());
            }
            ctx.sink.entry(entry);
            ctx.sink.progress((index + 1) as f64 / total as f64);
        }

        ctx.sink.send(ArchiveEvent::ArchiveInfo(info));
        debug!(archive = %ctx.archive.display(), entries = total, "listed zip archive");
        Ok(())
    }

    fn extract(
        &self,
        ctx: &mut LibraryContext,
        files: &[String],
        destination: &Path,
        options: &ExtractionOptions,
    ) -> Result<()> {
        let mut archive = open(&ctx.archive)?;
        let total = archive.len();
        let multiple = files.len() != 1;
        fs::create_dir_all(destination)?;

        for index in 0..total {
            ctx.check_cancelled()?;
            let (name, is_dir, mode) = {
                let file = archive.by_index_raw(index)?;
                (file.name().to_string(), file.is_dir(), file.unix_mode())
            };
            if !wanted(files, &name) {
                continue;
            }

            let relative = if options.preserve_paths {
                name.clone()
            } else if is_dir {
                continue;
            } else {
                Entry::new(name.as_str()).name().to_string()
            };
            let target = sanitize_path(&relative, destination)?;

            if is_dir {
                fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let Some(target) = resolve_target(ctx, target, &name, multiple)? else {
                debug!(entry = %name, "skipped existing file");
                continue;
            };

            read_entry(&mut archive, ctx, index, |reader| {
                let mut out = File::create(&target)?;
                io::copy(reader, &mut out)?;
                Ok(())
            })?;
            apply_mode(&target, mode)?;
            ctx.sink.progress((index + 1) as f64 / total as f64);
        }
        Ok(())
    }

    fn test(&self, ctx: &mut LibraryContext) -> Result<()> {
        let mut archive = open(&ctx.archive)?;
        let total = archive.len();
        for index in 0..total {
            ctx.check_cancelled()?;
            let name = archive.by_index_raw(index)?.name().to_string();
            read_entry(&mut archive, ctx, index, |reader| {
                io::copy(reader, &mut io::sink())
                    .map(|_| ())
                    .map_err(|e| Error::Corrupt(format!("{name}: {e}")))
            })
            .inspect_err(|e| ctx.sink.error(e.to_string()))?;
            ctx.sink.progress((index + 1) as f64 / total as f64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;
    use crate::cancel::CancelToken;
    use crate::event::EventSink;
    use tempfile::tempdir;

    fn build_zip(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().unix_permissions(0o644);
        writer.add_directory("bar/", options).unwrap();
        writer.start_file("bar/inner.txt", options).unwrap();
        writer.write_all(b"inner").unwrap();
        writer.start_file("foo.txt", options).unwrap();
        writer.write_all(b"foo").unwrap();
        writer.set_comment("archive note");
        writer.finish().unwrap();
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ArchiveEvent>) -> Vec<ArchiveEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn lists_entries_and_comment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.zip");
        build_zip(&path);

        let (sink, mut rx) = EventSink::channel();
        let mut ctx = LibraryContext::new(&path, sink, CancelToken::new());
        ZipBackend.list(&mut ctx).unwrap();

        let events = drain(&mut rx);
        let paths: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ArchiveEvent::Entry(entry) => Some(entry.path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(paths, vec!["bar/", "bar/inner.txt", "foo.txt"]);
        assert!(events.iter().any(|e| matches!(
            e,
            ArchiveEvent::ArchiveInfo(info) if info.comment.as_deref() == Some("archive note")
        )));
    }

    #[test]
    fn extracts_selected_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.zip");
        build_zip(&path);
        let out = dir.path().join("out");

        let (sink, _rx) = EventSink::channel();
        let mut ctx = LibraryContext::new(&path, sink, CancelToken::new());
        ZipBackend
            .extract(&mut ctx, &["bar/".into()], &out, &ExtractionOptions::default())
            .unwrap();

        assert_eq!(fs::read_to_string(out.join("bar/inner.txt")).unwrap(), "inner");
        assert!(!out.join("foo.txt").exists());
    }

    #[test]
    fn flattened_extraction_drops_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.zip");
        build_zip(&path);
        let out = dir.path().join("flat");

        let (sink, _rx) = EventSink::channel();
        let mut ctx = LibraryContext::new(&path, sink, CancelToken::new());
        let options = ExtractionOptions::default().preserve_paths(false);
        ZipBackend.extract(&mut ctx, &[], &out, &options).unwrap();

        assert!(out.join("inner.txt").is_file());
        assert!(out.join("foo.txt").is_file());
        assert!(!out.join("bar").exists());
    }

    #[test]
    fn cancelled_context_stops_work() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.zip");
        build_zip(&path);

        let cancel = CancelToken::new();
        cancel.cancel();
        let (sink, _rx) = EventSink::channel();
        let mut ctx = LibraryContext::new(&path, sink, cancel);
        assert!(matches!(ZipBackend.test(&mut ctx), Err(Error::Cancelled)));
    }

    #[test]
    fn garbage_is_reported_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        let (sink, _rx) = EventSink::channel();
        let mut ctx = LibraryContext::new(&path, sink, CancelToken::new());
        assert!(matches!(ZipBackend.list(&mut ctx), Err(Error::Corrupt(_))));
        assert!(matches!(
            ZipBackend.add(&mut ctx, &[], "", &Default::default()),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn formats_unix_modes() {
        assert_eq!(format_mode(0o100644), "-rw-r--r--");
        assert_eq!(format_mode(0o040755), "drwxr-xr-x");
    }
}
