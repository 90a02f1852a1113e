use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::event::ArchiveEvent;

/// A question the operation cannot answer on its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    Password { archive: PathBuf, retry: bool },
    Overwrite { file: String, multiple: bool },
    LoadCorrupt { archive: PathBuf },
    ContinueAfterError { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OverwriteChoice {
    Overwrite,
    OverwriteAll,
    Skip,
    AutoSkip,
    Rename(String),
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    /// `None` cancels.
    Password(Option<String>),
    Overwrite(OverwriteChoice),
    Confirm(bool),
    Continue { proceed: bool, dont_ask_again: bool },
}

impl Query {
    /// The answer equivalent to the user dismissing the question.
    pub fn cancel_answer(&self) -> Answer {
        match self {
            Self::Password { .. } => Answer::Password(None),
            Self::Overwrite { .. } => Answer::Overwrite(OverwriteChoice::Cancel),
            Self::LoadCorrupt { .. } => Answer::Confirm(false),
            Self::ContinueAfterError { .. } => Answer::Continue {
                proceed: false,
                dont_ask_again: false,
            },
        }
    }

    pub fn accepts(&self, answer: &Answer) -> bool {
        matches!(
            (self, answer),
            (Self::Password { .. }, Answer::Password(_))
                | (Self::Overwrite { .. }, Answer::Overwrite(_))
                | (Self::LoadCorrupt { .. }, Answer::Confirm(_))
                | (Self::ContinueAfterError { .. }, Answer::Continue { .. })
        )
    }
}

/// A query waiting for its answer. Resolving consumes it; dropping it
/// unanswered cancels.
#[derive(Debug)]
pub struct PendingQuery {
    query: Query,
    responder: oneshot::Sender<Answer>,
}

impl PendingQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn resolve(self, answer: Answer) {
        if self.responder.send(answer).is_err() {
            debug!(query = ?self.query, "query answered after the operation stopped");
        }
    }
}

/// Publishes queries on an operation's event stream and waits for answers.
#[derive(Clone, Debug)]
pub struct QueryChannel {
    tx: mpsc::UnboundedSender<ArchiveEvent>,
}

impl QueryChannel {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ArchiveEvent>) -> Self {
        Self { tx }
    }

    fn publish(&self, query: Query) -> Option<oneshot::Receiver<Answer>> {
        debug!(?query, "asking");
        let (responder, rx) = oneshot::channel();
        let pending = PendingQuery {
            query,
            responder,
        };
        match self.tx.send(ArchiveEvent::Query(pending)) {
            Ok(()) => Some(rx),
            Err(_) => {
                warn!("no listener for query, treating it as cancelled");
                None
            }
        }
    }

    fn settle(query: &Query, answer: Option<Answer>) -> Answer {
        match answer {
            Some(answer) if query.accepts(&answer) => answer,
            Some(answer) => {
                warn!(?query, ?answer, "mismatched answer, treating it as cancel");
                query.cancel_answer()
            }
            None => {
                debug!(?query, "query dropped unanswered");
                query.cancel_answer()
            }
        }
    }

    pub async fn ask(&self, query: Query) -> Answer {
        let answer = match self.publish(query.clone()) {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        Self::settle(&query, answer)
    }

    /// Blocking variant for worker threads. Must not be called from an async
    /// context. Gives up, as if dismissed, once `cancel` is set.
    pub fn ask_blocking(&self, query: Query, cancel: &CancelToken) -> Answer {
        let answer = match self.publish(query.clone()) {
            Some(rx) => wait_blocking(rx, cancel),
            None => None,
        };
        Self::settle(&query, answer)
    }
}

fn wait_blocking(rx: oneshot::Receiver<Answer>, cancel: &CancelToken) -> Option<Answer> {
    let wait = async {
        tokio::select! {
            answer = rx => answer.ok(),
            () = cancel.cancelled() => {
                debug!("stopped waiting for an answer after cancel");
                None
            }
        }
    };
    // Neither channel needs a driver, so any handle can poll them.
    match Handle::try_current() {
        Ok(handle) => handle.block_on(wait),
        Err(_) => match Builder::new_current_thread().build() {
            Ok(runtime) => runtime.block_on(wait),
            Err(e) => {
                warn!(error = %e, "cannot wait for an answer, treating it as cancelled");
                None
            }
        },
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Sticky {
    #[default]
    Ask,
    OverwriteAll,
    SkipAll,
}

/// Remembers "all" answers to overwrite questions for the rest of a job.
///
/// Shared by every step of the job, so a conflict answered with
/// overwrite-all or autoskip is never asked again.
#[derive(Clone, Debug, Default)]
pub struct OverwritePolicy {
    sticky: Arc<Mutex<Sticky>>,
}

impl OverwritePolicy {
    fn sticky(&self) -> Sticky {
        *self.sticky.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The choice to apply without asking, if an "all" answer was given.
    pub fn preset(&self) -> Option<OverwriteChoice> {
        match self.sticky() {
            Sticky::Ask => None,
            Sticky::OverwriteAll => Some(OverwriteChoice::OverwriteAll),
            Sticky::SkipAll => Some(OverwriteChoice::AutoSkip),
        }
    }

    pub fn remember(&self, choice: &OverwriteChoice) {
        let next = match choice {
            OverwriteChoice::OverwriteAll => Sticky::OverwriteAll,
            OverwriteChoice::AutoSkip => Sticky::SkipAll,
            _ => return,
        };
        *self.sticky.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn take_answer(&self, answer: Answer) -> OverwriteChoice {
        let choice = match answer {
            Answer::Overwrite(choice) => choice,
            _ => OverwriteChoice::Cancel,
        };
        self.remember(&choice);
        choice
    }

    pub async fn resolve(&self, queries: &QueryChannel, file: String, multiple: bool) -> OverwriteChoice {
        if let Some(choice) = self.preset() {
            return choice;
        }
        let answer = queries.ask(Query::Overwrite { file, multiple }).await;
        self.take_answer(answer)
    }

    pub fn resolve_blocking(
        &self,
        queries: &QueryChannel,
        file: String,
        multiple: bool,
        cancel: &CancelToken,
    ) -> OverwriteChoice {
        if let Some(choice) = self.preset() {
            return choice;
        }
        let answer = queries.ask_blocking(Query::Overwrite { file, multiple }, cancel);
        self.take_answer(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (QueryChannel, mpsc::UnboundedReceiver<ArchiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueryChannel::new(tx), rx)
    }

    async fn answer_next(rx: &mut mpsc::UnboundedReceiver<ArchiveEvent>, answer: Option<Answer>) -> Query {
        match rx.recv().await {
            Some(ArchiveEvent::Query(pending)) => {
                let query = pending.query().clone();
                if let Some(answer) = answer {
                    pending.resolve(answer);
                }
                query
            }
            other => panic!("expected a query, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ask_returns_answer() {
        let (queries, mut rx) = channel();
        let consumer = tokio::spawn(async move {
            answer_next(&mut rx, Some(Answer::Password(Some("pw".into())))).await
        });
        let answer = queries
            .ask(Query::Password {
                archive: "a.7z".into(),
                retry: false,
            })
            .await;
        assert_eq!(answer, Answer::Password(Some("pw".into())));
        assert!(matches!(consumer.await.unwrap(), Query::Password { retry: false, .. }));
    }

    #[tokio::test]
    async fn dropped_query_counts_as_cancel() {
        let (queries, mut rx) = channel();
        tokio::spawn(async move { answer_next(&mut rx, None).await });
        let answer = queries
            .ask(Query::LoadCorrupt {
                archive: "a.7z".into(),
            })
            .await;
        assert_eq!(answer, Answer::Confirm(false));
    }

    #[tokio::test]
    async fn mismatched_answer_counts_as_cancel() {
        let (queries, mut rx) = channel();
        tokio::spawn(async move { answer_next(&mut rx, Some(Answer::Confirm(true))).await });
        let answer = queries
            .ask(Query::Overwrite {
                file: "f".into(),
                multiple: false,
            })
            .await;
        assert_eq!(answer, Answer::Overwrite(OverwriteChoice::Cancel));
    }

    #[tokio::test]
    async fn missing_listener_counts_as_cancel() {
        let (queries, rx) = channel();
        drop(rx);
        let answer = queries
            .ask(Query::ContinueAfterError {
                message: "CRC".into(),
            })
            .await;
        assert!(matches!(answer, Answer::Continue { proceed: false, .. }));
    }

    #[tokio::test]
    async fn overwrite_all_is_not_asked_again() {
        let (queries, mut rx) = channel();
        let policy = OverwritePolicy::default();

        let consumer = tokio::spawn(async move {
            answer_next(&mut rx, Some(Answer::Overwrite(OverwriteChoice::OverwriteAll))).await;
            rx
        });
        let first = policy.resolve(&queries, "a".into(), true).await;
        let mut rx = consumer.await.unwrap();
        let second = policy.resolve(&queries, "b".into(), true).await;

        assert_eq!(first, OverwriteChoice::OverwriteAll);
        assert_eq!(second, OverwriteChoice::OverwriteAll);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn blocking_ask_from_worker_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (queries, mut rx) = channel();
        let policy = OverwritePolicy::default();

        let worker = std::thread::spawn(move || {
            let cancel = CancelToken::new();
            let first = policy.resolve_blocking(&queries, "x".into(), true, &cancel);
            let second = policy.resolve_blocking(&queries, "y".into(), true, &cancel);
            (first, second)
        });
        runtime.block_on(async {
            answer_next(&mut rx, Some(Answer::Overwrite(OverwriteChoice::AutoSkip))).await;
        });
        let (first, second) = worker.join().unwrap();
        assert_eq!(first, OverwriteChoice::AutoSkip);
        assert_eq!(second, OverwriteChoice::AutoSkip);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_ask_gives_up_on_cancel() {
        let (queries, mut rx) = channel();
        let cancel = CancelToken::new();

        let worker = {
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                queries.ask_blocking(
                    Query::Overwrite {
                        file: "f".into(),
                        multiple: true,
                    },
                    &cancel,
                )
            })
        };
        // Hold the query unanswered while cancelling.
        let pending = match rx.recv().await {
            Some(ArchiveEvent::Query(pending)) => pending,
            other => panic!("expected a query, got {other:?}"),
        };
        cancel.cancel();

        let answer = worker.await.unwrap();
        assert_eq!(answer, Answer::Overwrite(OverwriteChoice::Cancel));
        drop(pending);
    }
}
