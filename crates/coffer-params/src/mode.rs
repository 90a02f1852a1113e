use std::fmt;

use serde::{Deserialize, Serialize};

/// The operation a driver run performs. Exactly one per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    List,
    Extract,
    Add,
    Move,
    Copy,
    Delete,
    Test,
    Comment,
}

impl OperationMode {
    pub const ALL: [OperationMode; 8] = [
        Self::List,
        Self::Extract,
        Self::Add,
        Self::Move,
        Self::Copy,
        Self::Delete,
        Self::Test,
        Self::Comment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Extract => "extract",
            Self::Add => "add",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Delete => "delete",
            Self::Test => "test",
            Self::Comment => "comment",
        }
    }

    /// Modes that may re-prompt for a password after a wrong one.
    pub fn retries_password(self) -> bool {
        matches!(self, Self::List | Self::Extract)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
