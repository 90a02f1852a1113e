use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use coffer_archive::{ArchiveEvent, ArchiveInfo};

/// Lifecycle of a job. Terminal states never change again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Final result of a job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Message of the first error, unchanged.
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Succeeded
    }
}

/// What the last successful listing revealed about an archive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub listed: bool,
    pub entries: usize,
    /// First path components, directories with their trailing slash.
    pub top_level: Vec<String>,
    pub encrypted: bool,
    pub multi_volume: bool,
    pub archive_type: Option<String>,
    pub comment: Option<String>,
}

impl ArchiveSummary {
    /// Everything lives below one directory.
    pub fn is_single_folder(&self) -> bool {
        matches!(self.top_level.as_slice(), [only] if only.ends_with('/'))
    }
}

/// Accumulates listing facts from relayed events.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    entries: usize,
    top_level: BTreeSet<String>,
    encrypted: bool,
    info: ArchiveInfo,
}

impl Listing {
    pub(crate) fn observe(&mut self, event: &ArchiveEvent) {
        match event {
            ArchiveEvent::Entry(entry) => {
                self.entries += 1;
                self.encrypted |= entry.encrypted;
                self.top_level.insert(entry.top_level().to_string());
            }
            ArchiveEvent::ArchiveInfo(info) => {
                self.info.multi_volume |= info.multi_volume;
                if info.archive_type.is_some() {
                    self.info.archive_type = info.archive_type.clone();
                }
                if info.comment.is_some() {
                    self.info.comment = info.comment.clone();
                }
            }
            _ => {}
        }
    }

    pub(crate) fn into_summary(self) -> ArchiveSummary {
        ArchiveSummary {
            listed: true,
            entries: self.entries,
            top_level: self.top_level.into_iter().collect(),
            encrypted: self.encrypted,
            multi_volume: self.info.multi_volume,
            archive_type: self.info.archive_type,
            comment: self.info.comment,
        }
    }
}

/// Per-archive state that outlives single jobs.
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    pub password: Option<String>,
    pub encrypt_header: bool,
    /// "Don't ask again" answer to continue-after-error questions.
    pub ignore_corrupt: bool,
    pub summary: ArchiveSummary,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SharedState(Arc<Mutex<HandleState>>);

impl SharedState {
    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
