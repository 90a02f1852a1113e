use tokio::sync::mpsc;
use tracing::debug;

use crate::entry::Entry;
use crate::query::{PendingQuery, QueryChannel};

/// Archive-level facts reported by a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub archive_type: Option<String>,
    pub comment: Option<String>,
    pub multi_volume: bool,
}

impl ArchiveInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Everything an operation reports, in production order.
#[derive(Debug)]
pub enum ArchiveEvent {
    Entry(Entry),
    EntryRemoved(String),
    /// Fraction in `[0, 1]`.
    Progress(f64),
    ArchiveInfo(ArchiveInfo),
    Info(String),
    Error(String),
    Query(PendingQuery),
    Finished(bool),
    Cancelled,
}

impl ArchiveEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Cancelled)
    }
}

/// Sending half of an event stream.
///
/// A quiet sink drops terminal events; jobs hand quiet sinks to their steps
/// and report the outcome once themselves.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ArchiveEvent>,
    quiet: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ArchiveEvent>) -> Self {
        Self { tx, quiet: false }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ArchiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn quiet(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            quiet: true,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn queries(&self) -> QueryChannel {
        QueryChannel::new(self.tx.clone())
    }

    pub fn send(&self, event: ArchiveEvent) {
        if self.quiet && event.is_terminal() {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    /// Emit an entry, applying the directory invariant. Entries without a
    /// path are dropped.
    pub fn entry(&self, entry: Entry) {
        let entry = entry.normalized();
        if entry.path.is_empty() {
            debug!("dropping entry without a path");
            return;
        }
        self.send(ArchiveEvent::Entry(entry));
    }

    pub fn progress(&self, fraction: f64) {
        if fraction.is_finite() {
            self.send(ArchiveEvent::Progress(fraction.clamp(0.0, 1.0)));
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ArchiveEvent::Error(message.into()));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(ArchiveEvent::Info(message.into()));
    }

    pub fn finished(&self, success: bool) {
        self.send(ArchiveEvent::Finished(success));
    }

    pub fn cancelled(&self) {
        self.send(ArchiveEvent::Cancelled);
    }
}
