//! Archive operations behind one event contract.
//!
//! Two kinds of backend produce [`ArchiveEvent`]s:
//!
//! - [`CliDriver`] runs an archiver executable described by a
//!   [`coffer_params::ParameterTable`] and interprets its output line by line.
//! - [`LibraryBackend`] implementations such as [`ZipBackend`] work in process
//!   on a blocking thread.
//!
//! Questions for the user (passwords, overwrites, corrupt archives) travel on
//! the same stream as [`ArchiveEvent::Query`] and are answered through
//! [`PendingQuery::resolve`]. [`EntryTree`] folds list events into a hierarchy.

mod cancel;
pub mod cli;
mod entry;
mod error;
mod event;
pub mod library;
mod moves;
mod options;
mod query;
mod tree;

pub use cancel::CancelToken;
pub use cli::{CliDriver, DriverConfig, ListParser, Operation};
pub use entry::{Entry, is_descendant};
pub use error::{Error, Result};
pub use event::{ArchiveEvent, ArchiveInfo, EventSink};
pub use library::{LibraryBackend, LibraryContext, ZipBackend, sanitize_path};
pub use moves::{PlannedMove, entries_without_children, plan_moves};
pub use options::{CompressionOptions, ExtractionOptions};
pub use query::{
    Answer, OverwriteChoice, OverwritePolicy, PendingQuery, Query, QueryChannel,
};
pub use tree::{EntryTree, NodeId};
