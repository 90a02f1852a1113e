//! In-process backends built on archive libraries.
//!
//! A backend is a blocking entry producer with the same event contract as
//! the process driver; jobs run it on a worker thread.

mod sanitize;
mod zip_backend;

use std::path::{Path, PathBuf};

use coffer_params::OperationMode;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::event::EventSink;
use crate::options::{CompressionOptions, ExtractionOptions};
use crate::query::{Answer, OverwritePolicy, Query, QueryChannel};

pub use zip_backend::ZipBackend;
pub use sanitize::sanitize_path;

/// What a backend gets to talk to the outside world while it runs.
#[derive(Clone, Debug)]
pub struct LibraryContext {
    pub archive: PathBuf,
    pub sink: EventSink,
    pub cancel: CancelToken,
    pub password: Option<String>,
    pub overwrite: OverwritePolicy,
    queries: QueryChannel,
}

impl LibraryContext {
    pub fn new(archive: impl Into<PathBuf>, sink: EventSink, cancel: CancelToken) -> Self {
        let queries = sink.queries();
        Self {
            archive: archive.into(),
            sink,
            cancel,
            password: None,
            overwrite: OverwritePolicy::default(),
            queries,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_overwrite_policy(mut self, policy: OverwritePolicy) -> Self {
        self.overwrite = policy;
        self
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Ask and block the worker thread until answered or cancelled.
    pub fn ask(&self, query: Query) -> Answer {
        self.queries.ask_blocking(query, &self.cancel)
    }

    /// Ask for a password, storing the answer. `Err(Cancelled)` if declined.
    pub fn request_password(&mut self, retry: bool) -> Result<String> {
        let query = Query::Password {
            archive: self.archive.clone(),
            retry,
        };
        match self.ask(query) {
            Answer::Password(Some(password)) => {
                self.password = Some(password.clone());
                Ok(password)
            }
            _ => Err(Error::Cancelled),
        }
    }

    pub fn queries(&self) -> &QueryChannel {
        &self.queries
    }
}

/// Blocking archive backend. Unsupported operations report
/// [`Error::Unsupported`].
pub trait LibraryBackend: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, mode: OperationMode) -> bool;

    fn list(&self, ctx: &mut LibraryContext) -> Result<()>;

    /// Extract `files` (all entries when empty) below `destination`.
    fn extract(
        &self,
        ctx: &mut LibraryContext,
        files: &[String],
        destination: &Path,
        options: &ExtractionOptions,
    ) -> Result<()>;

    /// Add `files`, relative to the current working directory, under the
    /// in-archive directory `destination`.
    fn add(
        &self,
        _ctx: &mut LibraryContext,
        _files: &[String],
        _destination: &str,
        _options: &CompressionOptions,
    ) -> Result<()> {
        Err(self.unsupported(OperationMode::Add))
    }

    fn delete(&self, _ctx: &mut LibraryContext, _files: &[String]) -> Result<()> {
        Err(self.unsupported(OperationMode::Delete))
    }

    fn test(&self, _ctx: &mut LibraryContext) -> Result<()> {
        Err(self.unsupported(OperationMode::Test))
    }

    fn comment(&self, _ctx: &mut LibraryContext, _text: &str) -> Result<()> {
        Err(self.unsupported(OperationMode::Comment))
    }

    fn unsupported(&self, mode: OperationMode) -> Error {
        Error::Unsupported {
            backend: self.name().to_string(),
            mode,
        }
    }
}
