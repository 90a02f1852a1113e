use std::path::PathBuf;

use coffer_archive::{CompressionOptions, Entry, ExtractionOptions};
use coffer_params::OperationMode;

/// Sub-operation a job is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Listing,
    Extracting,
    Deleting,
    Adding,
}

/// Operations made of several tool runs, executed one step at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Composite {
    /// Extract, delete the originals, add under the new paths.
    Move,
    /// Extract, add under the new paths.
    Copy,
    BatchExtract { needs_listing: bool },
}

impl Composite {
    pub(crate) fn first(self) -> Step {
        match self {
            Self::BatchExtract { needs_listing: true } => Step::Listing,
            _ => Step::Extracting,
        }
    }

    /// Step after `step` succeeded, `None` when done.
    pub(crate) fn next(self, step: Step) -> Option<Step> {
        match (self, step) {
            (Self::Move, Step::Extracting) => Some(Step::Deleting),
            (Self::Move, Step::Deleting) => Some(Step::Adding),
            (Self::Copy, Step::Extracting) => Some(Step::Adding),
            (Self::BatchExtract { .. }, Step::Listing) => Some(Step::Extracting),
            _ => None,
        }
    }

    /// Share of overall progress owned by `step`, as `(start, end)`.
    pub(crate) fn span(self, step: Step) -> (f64, f64) {
        let steps: &[Step] = match self {
            Self::Move => &[Step::Extracting, Step::Deleting, Step::Adding],
            Self::Copy => &[Step::Extracting, Step::Adding],
            Self::BatchExtract { needs_listing: true } => &[Step::Listing, Step::Extracting],
            Self::BatchExtract { needs_listing: false } => &[Step::Extracting],
        };
        let Some(index) = steps.iter().position(|s| *s == step) else {
            return FULL;
        };
        let width = 1.0 / steps.len() as f64;
        (index as f64 * width, (index + 1) as f64 * width)
    }
}

pub(crate) const FULL: (f64, f64) = (0.0, 1.0);

/// What a job was created to do.
#[derive(Clone, Debug)]
pub(crate) enum Plan {
    List,
    Extract {
        entries: Vec<Entry>,
        destination: PathBuf,
        options: ExtractionOptions,
    },
    BatchExtract {
        destination: PathBuf,
        auto_subfolder: bool,
        options: ExtractionOptions,
    },
    Add {
        paths: Vec<PathBuf>,
        destination: String,
        options: CompressionOptions,
    },
    Move {
        entries: Vec<Entry>,
        destination: String,
        options: CompressionOptions,
    },
    Copy {
        entries: Vec<Entry>,
        destination: String,
        options: CompressionOptions,
    },
    Delete {
        entries: Vec<Entry>,
    },
    Test,
    Comment {
        text: String,
    },
}

impl Plan {
    pub(crate) fn mode(&self) -> OperationMode {
        match self {
            Self::List => OperationMode::List,
            Self::Extract { .. } | Self::BatchExtract { .. } => OperationMode::Extract,
            Self::Add { .. } => OperationMode::Add,
            Self::Move { .. } => OperationMode::Move,
            Self::Copy { .. } => OperationMode::Copy,
            Self::Delete { .. } => OperationMode::Delete,
            Self::Test => OperationMode::Test,
            Self::Comment { .. } => OperationMode::Comment,
        }
    }
}
