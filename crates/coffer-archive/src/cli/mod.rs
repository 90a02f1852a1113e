//! Drives archiver executables over their text interface.

mod buffer;
mod driver;
mod list;

use std::path::PathBuf;
use std::time::Duration;

use coffer_params::{OperationMode, Substitutions};

use crate::options::CompressionOptions;
use crate::query::OverwritePolicy;

pub use buffer::LineBuffer;
pub use driver::{CliDriver, ParserFactory};
pub use list::{ColumnParser, KeyValueParser, ListParser, parser_for};

#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Time a cancelled tool gets to exit after SIGTERM before it is killed.
    pub grace_period: Duration,
    pub read_chunk: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            read_chunk: 8 * 1024,
        }
    }
}

impl DriverConfig {
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }
}

/// One tool invocation: the mode plus everything its template may need.
///
/// The driver updates `password` (cleared on a wrong one, replaced by the
/// answer to a password query) and `ignore_corrupt` in place so the caller
/// can keep them for later operations.
#[derive(Clone, Debug)]
pub struct Operation {
    pub mode: OperationMode,
    pub archive: PathBuf,
    pub files: Vec<String>,
    /// Working directory of the child process.
    pub working_dir: Option<PathBuf>,
    pub password: Option<String>,
    pub encrypt_header: bool,
    pub preserve_paths: bool,
    pub compression: CompressionOptions,
    pub destinations: Vec<(String, String)>,
    pub comment: Option<String>,
    pub overwrite: OverwritePolicy,
    /// Continue past corruption without asking.
    pub ignore_corrupt: bool,
}

impl Operation {
    pub fn new(mode: OperationMode, archive: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            archive: archive.into(),
            files: Vec::new(),
            working_dir: None,
            password: None,
            encrypt_header: false,
            preserve_paths: true,
            compression: CompressionOptions::default(),
            destinations: Vec::new(),
            comment: None,
            overwrite: OverwritePolicy::default(),
            ignore_corrupt: false,
        }
    }

    pub fn files(mut self, files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn encrypt_header(mut self, encrypt: bool) -> Self {
        self.encrypt_header = encrypt;
        self
    }

    pub fn preserve_paths(mut self, preserve: bool) -> Self {
        self.preserve_paths = preserve;
        self
    }

    pub fn compression(mut self, options: CompressionOptions) -> Self {
        self.compression = options;
        self
    }

    pub fn destinations(mut self, pairs: Vec<(String, String)>) -> Self {
        self.destinations = pairs;
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    pub fn ignore_corrupt(mut self, ignore: bool) -> Self {
        self.ignore_corrupt = ignore;
        self
    }

    pub(crate) fn substitutions(&self, comment_file: Option<PathBuf>) -> Substitutions {
        Substitutions {
            archive: self.archive.clone(),
            files: self.files.clone(),
            password: self.password.clone(),
            encrypt_header: self.encrypt_header,
            preserve_paths: self.preserve_paths,
            compression_level: self.compression.level,
            compression_method: self.compression.method.clone(),
            encryption_method: self.compression.encryption_method.clone(),
            volume_size: self.compression.volume_size,
            destinations: self.destinations.clone(),
            comment_file,
        }
    }
}
