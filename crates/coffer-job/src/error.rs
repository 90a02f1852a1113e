use std::io;

use tokio::task::JoinError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Archive(#[from] coffer_archive::Error),

    #[error("'{path}' was not extracted")]
    Missing { path: String },

    #[error("worker thread failed: {0}")]
    Worker(#[from] JoinError),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Archive(e) if e.is_cancelled())
    }
}

impl From<coffer_fs::Error> for Error {
    fn from(e: coffer_fs::Error) -> Self {
        Self::Archive(e.into())
    }
}

impl From<coffer_params::Error> for Error {
    fn from(e: coffer_params::Error) -> Self {
        Self::Archive(e.into())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Archive(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
