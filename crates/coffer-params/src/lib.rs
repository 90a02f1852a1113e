//! Per-format parameter tables.
//!
//! A [`ParameterTable`] is pure data: which program runs each
//! [`OperationMode`], how its arguments are built, and which output lines mean
//! what. Tables are TOML documents; the built-in ones for 7z, rar and zip are
//! compiled into the crate and served by [`Registry::builtin`].

mod error;
mod mode;
mod pattern;
mod registry;
mod table;
mod template;

pub use error::{Error, Result};
pub use mode::OperationMode;
pub use pattern::PatternSet;
pub use registry::Registry;
pub use table::{
    ColumnGrammar, EntryField, KeyValueGrammar, ListGrammar, ModeSpec, OverwriteKeys,
    ParameterTable, Patterns, Switches,
};
pub use template::{CommandLine, Substitutions, escape_file_name};
