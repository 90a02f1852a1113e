//! Archive jobs: cancellable operations on one archive, each reporting
//! through a single event stream.
//!
//! [`Archive`] binds a file to a backend (an archiver executable or an in
//! process library) and creates [`Job`]s. Move, copy and batch extraction
//! are composites of several tool runs; a composite job advances through its
//! [`Step`]s strictly in order and stops at the first failure, reporting
//! that failure's message unchanged. Every job ends with exactly one terminal
//! event.

mod archive;
mod error;
mod job;
mod runner;
mod state;
mod step;

pub use archive::Archive;
pub use error::{Error, Result};
pub use job::Job;
pub use state::{ArchiveSummary, JobOutcome, JobState};
pub use step::Step;
