use std::io;
use std::path::PathBuf;

use coffer_params::OperationMode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to start '{program}': {source}")]
    Spawn { program: PathBuf, source: io::Error },

    #[error(transparent)]
    Params(#[from] coffer_params::Error),

    #[error(transparent)]
    Fs(#[from] coffer_fs::Error),

    #[error("wrong password")]
    WrongPassword,

    #[error("archive is corrupt: {0}")]
    Corrupt(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("{0}")]
    Tool(String),

    #[error("failed to read archiver output: {0}")]
    Output(io::Error),

    #[error("{backend} does not support {mode}")]
    Unsupported { backend: String, mode: OperationMode },

    #[error("zip-slip attack detected: entry '{entry}' resolves to '{resolved}'")]
    ZipSlip { entry: PathBuf, resolved: PathBuf },

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Fs(coffer_fs::Error::Cancelled { .. }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
