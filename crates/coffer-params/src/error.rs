use std::path::PathBuf;

use thiserror::Error;

use crate::mode::OperationMode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse parameter table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid pattern '{pattern}' in {field}: {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        source: regex::Error,
    },

    #[error("unknown list field '{0}'")]
    UnknownField(String),

    #[error("no parameter table for '{0}'")]
    UnknownFormat(String),

    #[error("format '{format}' does not support {mode}")]
    UnsupportedMode { format: String, mode: OperationMode },

    #[error("none of the programs for {mode} were found: {}", candidates.join(", "))]
    ProgramNotFound {
        mode: OperationMode,
        candidates: Vec<String>,
    },

    #[error("failed to read parameter tables from '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
