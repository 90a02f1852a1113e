//! Filesystem primitives owned by archive jobs.
//!
//! - [`Workspace`]: a scratch directory removed unconditionally on drop,
//!   optionally committed (merged) into a destination first.
//! - [`WorkingDirGuard`]: scoped change of the process working directory,
//!   restored on every exit path.
//! - [`merge_tree`]: move a staged tree into a destination, asking a resolver
//!   once per conflicting path.
//! - [`copy_tree`]: recursive copy that keeps symbolic links as links.

mod copy;
mod error;
mod merge;
mod workdir;
mod workspace;

pub use copy::copy_tree;
pub use error::{Error, Result};
pub use merge::{Conflict, MergeReport, merge_tree, merge_tree_until};
pub use workdir::WorkingDirGuard;
pub use workspace::Workspace;
