use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use coffer_archive::{
    Answer, ArchiveEvent, CancelToken, CliDriver, CompressionOptions, Entry, EventSink,
    ExtractionOptions, LibraryBackend, LibraryContext, Operation, OverwriteChoice,
    OverwritePolicy, PlannedMove, Query, is_descendant, plan_moves,
};
use coffer_fs::{Conflict, WorkingDirGuard, Workspace};
use coffer_params::OperationMode;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::state::{JobOutcome, JobState, Listing, SharedState};
use crate::step::{Composite, FULL, Plan, Step};

/// Where a job's tool runs happen.
#[derive(Clone)]
pub(crate) enum Backend {
    Cli(CliDriver),
    Library(Arc<dyn LibraryBackend>),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli(driver) => f.debug_tuple("Cli").field(driver).finish(),
            Self::Library(backend) => f.debug_tuple("Library").field(&backend.name()).finish(),
        }
    }
}

impl Backend {
    pub(crate) fn name(&self) -> String {
        match self {
            Self::Cli(driver) => driver.table().format.clone(),
            Self::Library(backend) => backend.name().to_string(),
        }
    }

    pub(crate) fn supports(&self, mode: OperationMode) -> bool {
        match self {
            Self::Cli(driver) => driver.supports(mode),
            Self::Library(backend) => backend.supports(mode),
        }
    }

    fn require(&self, mode: OperationMode) -> Result<()> {
        if self.supports(mode) {
            return Ok(());
        }
        Err(coffer_archive::Error::Unsupported {
            backend: self.name(),
            mode,
        }
        .into())
    }
}

/// One tool run.
#[derive(Clone, Debug)]
enum Primitive {
    List,
    Extract {
        files: Vec<String>,
        destination: PathBuf,
        preserve_paths: bool,
    },
    Add {
        files: Vec<String>,
        working_dir: Option<PathBuf>,
        destination: String,
        compression: CompressionOptions,
    },
    Move {
        pairs: Vec<(String, String)>,
    },
    Delete {
        files: Vec<String>,
    },
    Test,
    Comment {
        text: String,
    },
}

impl Primitive {
    fn mode(&self) -> OperationMode {
        match self {
            Self::List => OperationMode::List,
            Self::Extract { .. } => OperationMode::Extract,
            Self::Add { .. } => OperationMode::Add,
            Self::Move { .. } => OperationMode::Move,
            Self::Delete { .. } => OperationMode::Delete,
            Self::Test => OperationMode::Test,
            Self::Comment { .. } => OperationMode::Comment,
        }
    }
}

/// Receiving ends of a job's status channels.
pub(crate) struct Watchers {
    pub progress: watch::Receiver<f64>,
    pub state: watch::Receiver<JobState>,
    pub step: watch::Receiver<Option<Step>>,
}

/// Executes one plan. Steps report on private quiet sinks; the runner relays
/// their events, rescales progress, and emits the single terminal event.
pub(crate) struct Runner {
    archive: PathBuf,
    backend: Backend,
    state: SharedState,
    /// Archive file name without its format extension.
    stem: String,
    overwrite: OverwritePolicy,
    cancel: CancelToken,
    sink: EventSink,
    progress: watch::Sender<f64>,
    job_state: watch::Sender<JobState>,
    step: watch::Sender<Option<Step>>,
    errors_seen: usize,
}

impl Runner {
    pub(crate) fn new(
        archive: PathBuf,
        backend: Backend,
        state: SharedState,
        stem: String,
        sink: EventSink,
        cancel: CancelToken,
    ) -> (Self, Watchers) {
        let (progress, progress_rx) = watch::channel(0.0);
        let (job_state, state_rx) = watch::channel(JobState::Created);
        let (step, step_rx) = watch::channel(None);
        let runner = Self {
            archive,
            backend,
            state,
            stem,
            overwrite: OverwritePolicy::default(),
            cancel,
            sink,
            progress,
            job_state,
            step,
            errors_seen: 0,
        };
        let watchers = Watchers {
            progress: progress_rx,
            state: state_rx,
            step: step_rx,
        };
        (runner, watchers)
    }

    pub(crate) async fn run(mut self, plan: Plan) -> JobOutcome {
        let mode = plan.mode();
        self.job_state.send_replace(JobState::Running);
        info!(
            archive = %self.archive.display(),
            %mode,
            backend = %self.backend.name(),
            "job started"
        );

        let result = self.execute(plan).await;
        self.step.send_replace(None);

        let outcome = match result {
            Ok(()) if self.cancel.is_cancelled() => JobOutcome::Cancelled,
            Ok(()) => {
                if matches!(
                    mode,
                    OperationMode::Add | OperationMode::Move | OperationMode::Copy | OperationMode::Delete
                ) {
                    self.state.lock().summary.listed = false;
                }
                self.progress.send_replace(1.0);
                JobOutcome::Succeeded
            }
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => {
                let message = e.to_string();
                if self.errors_seen == 0 {
                    self.sink.error(message.clone());
                }
                JobOutcome::Failed(message)
            }
        };

        self.job_state.send_replace(outcome.state());
        match &outcome {
            JobOutcome::Succeeded => self.sink.finished(true),
            JobOutcome::Failed(message) => {
                warn!(%mode, error = %message, "job failed");
                self.sink.finished(false);
            }
            JobOutcome::Cancelled => self.sink.cancelled(),
        }
        info!(archive = %self.archive.display(), %mode, ?outcome, "job finished");
        outcome
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(coffer_archive::Error::Cancelled.into())
        } else {
            Ok(())
        }
    }

    fn enter(&self, step: Step) {
        debug!(?step, "entering step");
        self.step.send_replace(Some(step));
    }

    async fn execute(&mut self, plan: Plan) -> Result<()> {
        self.check_cancelled()?;
        match plan {
            Plan::List => {
                self.backend.require(OperationMode::List)?;
                self.list(FULL).await
            }
            Plan::Extract {
                entries,
                destination,
                options,
            } => {
                self.backend.require(OperationMode::Extract)?;
                self.enter(Step::Extracting);
                self.extract(paths_of(&entries), &destination, &options, FULL).await
            }
            Plan::BatchExtract {
                destination,
                auto_subfolder,
                options,
            } => self.batch_extract(destination, auto_subfolder, options).await,
            Plan::Add {
                paths,
                destination,
                options,
            } => {
                self.backend.require(OperationMode::Add)?;
                self.enter(Step::Adding);
                self.add(paths, destination, options).await
            }
            Plan::Move {
                entries,
                destination,
                options,
            } => {
                let native = matches!(self.backend, Backend::Cli(_)) && self.backend.supports(OperationMode::Move);
                if native {
                    self.native_move(entries, destination).await
                } else {
                    self.transfer(Composite::Move, entries, destination, options).await
                }
            }
            Plan::Copy {
                entries,
                destination,
                options,
            } => self.transfer(Composite::Copy, entries, destination, options).await,
            Plan::Delete { entries } => {
                self.backend.require(OperationMode::Delete)?;
                let files = paths_of(&entries);
                if files.is_empty() {
                    return Ok(());
                }
                self.enter(Step::Deleting);
                self.primitive(Primitive::Delete { files: files.clone() }, FULL).await?;
                self.announce_removed(&files);
                Ok(())
            }
            Plan::Test => {
                self.backend.require(OperationMode::Test)?;
                self.primitive(Primitive::Test, FULL).await?;
                Ok(())
            }
            Plan::Comment { text } => {
                self.backend.require(OperationMode::Comment)?;
                self.primitive(Primitive::Comment { text: text.clone() }, FULL).await?;
                let comment = Some(text).filter(|text| !text.trim().is_empty());
                self.state.lock().summary.comment = comment;
                Ok(())
            }
        }
    }

    /// Run one tool invocation, relaying its events until it is done.
    async fn primitive(&mut self, primitive: Primitive, span: (f64, f64)) -> Result<Listing> {
        self.check_cancelled()?;
        debug!(mode = %primitive.mode(), ?span, "running primitive");

        let (inner, rx) = EventSink::channel();
        let quiet = inner.quiet();
        drop(inner);

        let (result, relayed) = tokio::join!(
            self.dispatch(primitive, quiet),
            relay(rx, &self.sink, &self.progress, span)
        );
        self.errors_seen += relayed.errors;
        result.map(|()| relayed.listing)
    }

    async fn dispatch(&self, primitive: Primitive, sink: EventSink) -> Result<()> {
        match &self.backend {
            Backend::Cli(driver) => {
                let mut op = self.operation(primitive);
                let result = driver.run(&mut op, &sink, &self.cancel).await;
                {
                    let mut state = self.state.lock();
                    state.password = op.password;
                    state.ignore_corrupt = op.ignore_corrupt;
                }
                Ok(result?)
            }
            Backend::Library(backend) => {
                let backend = Arc::clone(backend);
                let password = self.state.lock().password.clone();
                let mut ctx = LibraryContext::new(self.archive.clone(), sink, self.cancel.clone())
                    .with_password(password)
                    .with_overwrite_policy(self.overwrite.clone());
                let (result, password) = tokio::task::spawn_blocking(move || {
                    let result = run_library(backend.as_ref(), &mut ctx, primitive);
                    (result, ctx.password)
                })
                .await?;
                self.state.lock().password = password;
                Ok(result?)
            }
        }
    }

    fn operation(&self, primitive: Primitive) -> Operation {
        let (password, encrypt_header, ignore_corrupt) = {
            let state = self.state.lock();
            (state.password.clone(), state.encrypt_header, state.ignore_corrupt)
        };
        let op = Operation::new(primitive.mode(), self.archive.clone())
            .password(password)
            .encrypt_header(encrypt_header)
            .ignore_corrupt(ignore_corrupt)
            .overwrite_policy(self.overwrite.clone());

        match primitive {
            Primitive::List | Primitive::Test => op,
            Primitive::Extract {
                files,
                destination,
                preserve_paths,
            } => op.files(files).working_dir(destination).preserve_paths(preserve_paths),
            Primitive::Add {
                files,
                working_dir,
                compression,
                ..
            } => {
                let op = op.files(files).compression(compression);
                match working_dir {
                    Some(dir) => op.working_dir(dir),
                    None => op,
                }
            }
            Primitive::Move { pairs } => op.destinations(pairs),
            Primitive::Delete { files } => op.files(files),
            Primitive::Comment { text } => op.comment(text),
        }
    }

    async fn list(&mut self, span: (f64, f64)) -> Result<()> {
        self.enter(Step::Listing);
        let summary = self.primitive(Primitive::List, span).await?.into_summary();
        debug!(
            entries = summary.entries,
            top_level = summary.top_level.len(),
            "archive listed"
        );
        self.state.lock().summary = summary;
        Ok(())
    }

    /// Ask for a password before starting when the archive is known to be
    /// encrypted.
    async fn ensure_password(&self) -> Result<()> {
        let known = self.state.lock().password.is_some();
        if known {
            return Ok(());
        }
        let query = Query::Password {
            archive: self.archive.clone(),
            retry: false,
        };
        match self.sink.queries().ask(query).await {
            Answer::Password(Some(password)) => {
                self.state.lock().password = Some(password);
                Ok(())
            }
            _ => Err(coffer_archive::Error::Cancelled.into()),
        }
    }

    async fn extract(
        &mut self,
        files: Vec<String>,
        destination: &Path,
        options: &ExtractionOptions,
        span: (f64, f64),
    ) -> Result<()> {
        if options.encrypted_archive_hint {
            self.ensure_password().await?;
        }
        tokio::fs::create_dir_all(destination).await?;

        if !options.uses_staging() {
            let primitive = Primitive::Extract {
                files,
                destination: destination.to_path_buf(),
                preserve_paths: options.preserve_paths,
            };
            self.primitive(primitive, span).await?;
            return Ok(());
        }

        let staging = Workspace::hidden_in(destination)?;
        debug!(staging = %staging.path().display(), "extracting through staging directory");
        let primitive = Primitive::Extract {
            files,
            destination: staging.path().to_path_buf(),
            preserve_paths: options.preserve_paths,
        };
        self.primitive(primitive, span).await?;
        self.check_cancelled()?;
        self.commit(staging).await
    }

    /// Merge a staged extraction into its destination, asking once per
    /// conflicting path.
    async fn commit(&self, staging: Workspace) -> Result<()> {
        let policy = self.overwrite.clone();
        let queries = self.sink.queries();
        let cancel = self.cancel.clone();
        let destination = staging.destination().map(Path::to_path_buf).unwrap_or_default();

        let report = tokio::task::spawn_blocking(move || {
            let resolve = |path: &Path| {
                if cancel.is_cancelled() {
                    return Conflict::Cancel;
                }
                let file = path.strip_prefix(&destination).unwrap_or(path);
                conflict(policy.resolve_blocking(&queries, file.display().to_string(), true, &cancel))
            };
            staging.commit_until(resolve, || cancel.is_cancelled())
        })
        .await??;

        info!(
            moved = report.moved.len(),
            skipped = report.skipped.len(),
            "merged extracted files"
        );
        Ok(())
    }

    async fn batch_extract(
        &mut self,
        mut destination: PathBuf,
        auto_subfolder: bool,
        options: ExtractionOptions,
    ) -> Result<()> {
        self.backend.require(OperationMode::Extract)?;
        let listed = self.state.lock().summary.listed;
        let composite = Composite::BatchExtract { needs_listing: !listed };

        let mut step = Some(composite.first());
        while let Some(current) = step {
            self.check_cancelled()?;
            self.enter(current);
            let span = composite.span(current);
            match current {
                Step::Listing => {
                    self.backend.require(OperationMode::List)?;
                    self.list(span).await?;
                }
                Step::Extracting => {
                    let top_level = self.state.lock().summary.top_level.len();
                    if auto_subfolder && top_level > 1 {
                        destination = unique_subfolder(&destination, &self.stem);
                        info!(destination = %destination.display(), "extracting into subfolder");
                    }
                    self.extract(Vec::new(), &destination, &options, span).await?;
                }
                Step::Deleting | Step::Adding => debug!(step = ?current, "no work in batch extraction"),
            }
            step = composite.next(current);
        }
        Ok(())
    }

    async fn add(&mut self, paths: Vec<PathBuf>, destination: String, options: CompressionOptions) -> Result<()> {
        let destination = destination.trim_matches('/').to_string();
        let files: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();

        if destination.is_empty() || matches!(self.backend, Backend::Library(_)) {
            let primitive = Primitive::Add {
                files,
                working_dir: options.global_work_dir.clone(),
                destination,
                compression: options,
            };
            self.primitive(primitive, FULL).await?;
            return Ok(());
        }

        // Tools add paths as given relative to their working directory, so
        // the files are laid out below the destination in a scratch tree.
        let base = options.global_work_dir.clone();
        let target = destination.clone();
        let staging = tokio::task::spawn_blocking(move || stage_additions(&paths, base.as_deref(), &target)).await??;
        let top = destination.split('/').next().unwrap_or_default().to_string();

        let primitive = Primitive::Add {
            files: vec![top],
            working_dir: Some(staging.path().to_path_buf()),
            destination: String::new(),
            compression: options,
        };
        self.primitive(primitive, FULL).await?;
        Ok(())
    }

    async fn native_move(&mut self, entries: Vec<Entry>, destination: String) -> Result<()> {
        let entries: Vec<Entry> = entries.into_iter().map(Entry::normalized).collect();
        if entries.is_empty() {
            return Ok(());
        }
        let plan = plan_moves(&entries, &destination);
        let pairs = plan
            .iter()
            .map(|m| {
                (
                    m.from.trim_end_matches('/').to_string(),
                    m.to.trim_end_matches('/').to_string(),
                )
            })
            .collect();

        self.primitive(Primitive::Move { pairs }, FULL).await?;
        let moved: Vec<String> = plan.iter().map(|m| m.from.clone()).collect();
        self.announce_removed(&moved);
        self.announce_moved(&entries, &plan);
        Ok(())
    }

    /// Move or copy entries by extracting them, laying them out under their
    /// new paths and adding them back. Each step must succeed before the next
    /// one starts; completed steps are not undone.
    async fn transfer(
        &mut self,
        composite: Composite,
        entries: Vec<Entry>,
        destination: String,
        options: CompressionOptions,
    ) -> Result<()> {
        self.backend.require(OperationMode::Extract)?;
        self.backend.require(OperationMode::Add)?;
        if composite == Composite::Move {
            self.backend.require(OperationMode::Delete)?;
        }

        let entries: Vec<Entry> = entries.into_iter().map(Entry::normalized).collect();
        if entries.is_empty() {
            return Ok(());
        }
        let plan = plan_moves(&entries, &destination);
        let files = paths_of(&entries);
        info!(?composite, entries = plan.len(), destination = %destination, "planned transfer");

        let extracted = Workspace::new("coffer-extract-")?;
        let mut staged: Option<Workspace> = None;

        let mut step = Some(composite.first());
        while let Some(current) = step {
            self.check_cancelled()?;
            self.enter(current);
            let span = composite.span(current);
            match current {
                Step::Extracting => {
                    let primitive = Primitive::Extract {
                        files: files.clone(),
                        destination: extracted.path().to_path_buf(),
                        preserve_paths: true,
                    };
                    self.primitive(primitive, span).await?;
                    let source = extracted.path().to_path_buf();
                    let moves = plan.clone();
                    staged = Some(tokio::task::spawn_blocking(move || stage_moves(&source, &moves)).await??);
                }
                Step::Deleting => {
                    self.primitive(Primitive::Delete { files: files.clone() }, span).await?;
                    self.announce_removed(&files);
                }
                Step::Adding => {
                    if let Some(staging) = &staged {
                        let primitive = Primitive::Add {
                            files: staging.top_level()?,
                            working_dir: Some(staging.path().to_path_buf()),
                            destination: String::new(),
                            compression: options.clone(),
                        };
                        self.primitive(primitive, span).await?;
                        self.announce_moved(&entries, &plan);
                    }
                }
                Step::Listing => debug!("no listing in transfers"),
            }
            step = composite.next(current);
        }
        Ok(())
    }

    fn announce_removed(&self, paths: &[String]) {
        for path in paths {
            self.sink.send(ArchiveEvent::EntryRemoved(path.clone()));
        }
    }

    fn announce_moved(&self, entries: &[Entry], plan: &[PlannedMove]) {
        for planned in plan {
            let mut entry = entries
                .iter()
                .find(|entry| entry.path == planned.from)
                .cloned()
                .unwrap_or_else(|| Entry::new(planned.from.clone()));
            entry.path = planned.to.clone();
            entry.is_dir = planned.is_dir;
            self.sink.entry(entry);
        }
    }
}

#[derive(Debug, Default)]
struct Relayed {
    errors: usize,
    listing: Listing,
}

/// Forward events from a step's private channel until it closes, mapping
/// progress into the step's share of the job.
async fn relay(
    mut rx: mpsc::UnboundedReceiver<ArchiveEvent>,
    outer: &EventSink,
    progress: &watch::Sender<f64>,
    (start, end): (f64, f64),
) -> Relayed {
    let mut relayed = Relayed::default();
    while let Some(event) = rx.recv().await {
        match event {
            ArchiveEvent::Progress(fraction) => {
                let overall = start + (end - start) * fraction;
                progress.send_replace(overall);
                outer.progress(overall);
            }
            event => {
                if matches!(event, ArchiveEvent::Error(_)) {
                    relayed.errors += 1;
                }
                relayed.listing.observe(&event);
                outer.send(event);
            }
        }
    }
    relayed
}

fn run_library(
    backend: &dyn LibraryBackend,
    ctx: &mut LibraryContext,
    primitive: Primitive,
) -> coffer_archive::Result<()> {
    match primitive {
        Primitive::List => backend.list(ctx),
        Primitive::Extract {
            files,
            destination,
            preserve_paths,
        } => {
            let options = ExtractionOptions::default().preserve_paths(preserve_paths);
            backend.extract(ctx, &files, &destination, &options)
        }
        Primitive::Add {
            files,
            working_dir,
            destination,
            compression,
        } => {
            let _guard = working_dir.map(WorkingDirGuard::change_to).transpose()?;
            backend.add(ctx, &files, &destination, &compression)
        }
        Primitive::Move { .. } => Err(backend.unsupported(OperationMode::Move)),
        Primitive::Delete { files } => backend.delete(ctx, &files),
        Primitive::Test => backend.test(ctx),
        Primitive::Comment { text } => backend.comment(ctx, &text),
    }
}

fn conflict(choice: OverwriteChoice) -> Conflict {
    match choice {
        OverwriteChoice::Overwrite | OverwriteChoice::OverwriteAll => Conflict::Overwrite,
        OverwriteChoice::Skip | OverwriteChoice::AutoSkip => Conflict::Skip,
        OverwriteChoice::Rename(name) => Conflict::Rename(name),
        OverwriteChoice::Cancel => Conflict::Cancel,
    }
}

/// Sorted, de-duplicated entry paths.
fn paths_of(entries: &[Entry]) -> Vec<String> {
    let mut paths: Vec<String> = entries
        .iter()
        .map(|entry| entry.clone().normalized().path)
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

/// Archive file name without the extension the format matched, falling back
/// to the last extension.
pub(crate) fn archive_stem(path: &Path, extension_len: Option<usize>) -> String {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let matched = extension_len
        .and_then(|len| name.len().checked_sub(len + 1))
        .and_then(|end| name.get(..end))
        .filter(|stem| !stem.is_empty());
    match matched {
        Some(stem) => stem.to_string(),
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(name),
    }
}

/// `parent/name`, or `parent/name (n)` with the first free `n`.
fn unique_subfolder(parent: &Path, name: &str) -> PathBuf {
    let mut candidate = parent.join(name);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{name} ({n})"));
        n += 1;
    }
    candidate
}

/// Lay extracted entries out under their planned paths in a new workspace.
fn stage_moves(extracted: &Path, plan: &[PlannedMove]) -> Result<Workspace> {
    let staging = Workspace::new("coffer-stage-")?;
    let mut moved_dirs: Vec<&str> = Vec::new();

    for planned in plan {
        if moved_dirs.iter().any(|dir| is_descendant(&planned.from, dir)) {
            continue;
        }
        let from = extracted.join(planned.from.trim_end_matches('/'));
        let to = staging.path().join(planned.to.trim_end_matches('/'));
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }

        if planned.is_dir {
            if from.is_dir() {
                fs::rename(&from, &to)?;
            } else {
                fs::create_dir_all(&to)?;
            }
            moved_dirs.push(&planned.from);
        } else if fs::symlink_metadata(&from).is_ok() {
            fs::rename(&from, &to)?;
        } else {
            return Err(Error::Missing {
                path: planned.from.clone(),
            });
        }
    }
    Ok(staging)
}

/// Copy `paths` below `destination` in a new workspace.
fn stage_additions(paths: &[PathBuf], base: Option<&Path>, destination: &str) -> Result<Workspace> {
    let staging = Workspace::new("coffer-add-")?;
    let target = staging.path().join(destination);
    fs::create_dir_all(&target)?;

    for path in paths {
        let source = match base {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        };
        let Some(name) = source.file_name() else {
            warn!(path = %source.display(), "skipping path without a file name");
            continue;
        };
        coffer_fs::copy_tree(&source, target.join(name))?;
    }
    Ok(staging)
}
