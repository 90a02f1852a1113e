use std::fmt;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use coffer_params::{CommandLine, ListGrammar, OperationMode, ParameterTable};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use super::buffer::LineBuffer;
use super::list::{ListParser, parser_for};
use super::{DriverConfig, Operation};
use crate::cancel::CancelToken;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::event::{ArchiveEvent, EventSink};
use crate::query::{Answer, OverwriteChoice, Query, QueryChannel};

/// Builds the list parser for a run, overriding the table's grammar.
pub type ParserFactory = Arc<dyn Fn(Option<&ListGrammar>) -> Option<Box<dyn ListParser>> + Send + Sync>;

/// Runs one archiver process per operation and translates its output into
/// events, driven by an immutable parameter table.
#[derive(Clone)]
pub struct CliDriver {
    table: Arc<ParameterTable>,
    config: DriverConfig,
    parsers: Option<ParserFactory>,
}

impl fmt::Debug for CliDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliDriver")
            .field("format", &self.table.format)
            .field("config", &self.config)
            .field("custom_parser", &self.parsers.is_some())
            .finish()
    }
}

impl CliDriver {
    pub fn new(table: Arc<ParameterTable>) -> Self {
        Self {
            table,
            config: DriverConfig::default(),
            parsers: None,
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the grammar-driven list parser, for formats whose listing
    /// needs its own state machine.
    pub fn with_list_parser(mut self, factory: ParserFactory) -> Self {
        self.parsers = Some(factory);
        self
    }

    pub fn table(&self) -> &Arc<ParameterTable> {
        &self.table
    }

    pub fn supports(&self, mode: OperationMode) -> bool {
        self.table.supports(mode)
    }

    fn list_parser(&self) -> Option<Box<dyn ListParser>> {
        match &self.parsers {
            Some(factory) => factory(self.table.list.as_ref()),
            None => self.table.list.as_ref().map(parser_for),
        }
    }

    /// Run `op` to completion, emitting exactly one terminal event on `sink`
    /// unless it is quiet.
    pub async fn run(&self, op: &mut Operation, sink: &EventSink, cancel: &CancelToken) -> Result<()> {
        let result = self.execute(op, sink, cancel).await;
        match &result {
            Ok(()) => sink.finished(true),
            Err(e) if e.is_cancelled() => sink.cancelled(),
            Err(e) => {
                if !reported_while_running(e) {
                    sink.error(e.to_string());
                }
                sink.finished(false);
            }
        }
        result
    }

    async fn execute(&self, op: &mut Operation, sink: &EventSink, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let comment_file = op.comment.as_deref().map(write_comment).transpose()?;
        let comment_path = comment_file.as_ref().map(|file| file.path().to_path_buf());

        loop {
            let line = self
                .table
                .command_line(op.mode, &op.substitutions(comment_path.clone()))?;
            let mut session = Session::new(self, op.mode, sink);
            match session.run_process(&line, op, cancel).await {
                Ok(Exit::Restart) => debug!(
                    mode = %op.mode,
                    discarded = session.held.len(),
                    "restarting archiver with new password"
                ),
                Ok(Exit::Done(status)) => {
                    session.publish_entries();
                    return session.conclude(&line, status);
                }
                Err(e) => {
                    session.publish_entries();
                    return Err(e);
                }
            }
        }
    }
}

fn write_comment(text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("coffer-comment-").tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn reported_while_running(error: &Error) -> bool {
    matches!(
        error,
        Error::Tool(_) | Error::Output(_) | Error::Corrupt(_) | Error::DiskFull(_) | Error::WrongPassword
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// An error was recorded; stop the tool.
    Stop,
    /// Stop the tool and start it again with the updated operation.
    Restart,
    Cancel,
}

enum Exit {
    Done(ExitStatus),
    Restart,
}

/// State of one process run.
struct Session<'a> {
    table: &'a ParameterTable,
    config: &'a DriverConfig,
    mode: OperationMode,
    sink: &'a EventSink,
    queries: QueryChannel,
    parser: Option<Box<dyn ListParser>>,
    /// Entries parsed so far. A restarted run never publishes its own.
    held: Vec<Entry>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    stdin: Option<ChildStdin>,
    error: Option<Error>,
    test_passed: bool,
    loaded_corrupt: bool,
    multi_volume: bool,
    password_sent: bool,
    overwrite_file: Option<String>,
    pending_rename: Option<String>,
}

impl<'a> Session<'a> {
    fn new(driver: &'a CliDriver, mode: OperationMode, sink: &'a EventSink) -> Self {
        Self {
            table: &driver.table,
            config: &driver.config,
            mode,
            sink,
            queries: sink.queries(),
            parser: if mode == OperationMode::List {
                driver.list_parser()
            } else {
                None
            },
            held: Vec::new(),
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            stdin: None,
            error: None,
            test_passed: false,
            loaded_corrupt: false,
            multi_volume: false,
            password_sent: false,
            overwrite_file: None,
            pending_rename: None,
        }
    }

    async fn run_process(&mut self, line: &CommandLine, op: &mut Operation, cancel: &CancelToken) -> Result<Exit> {
        let mut command = Command::new(&line.program);
        command
            .args(&line.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &op.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: line.program.clone(),
            source,
        })?;
        info!(
            program = %line.program.display(),
            mode = %self.mode,
            pid = ?child.id(),
            "started archiver"
        );

        self.stdin = child.stdin.take();
        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::Tool("archiver output is not captured".into()));
        };

        let mut out_chunk = vec![0u8; self.config.read_chunk];
        let mut err_chunk = vec![0u8; self.config.read_chunk];
        let (mut out_open, mut err_open) = (true, true);

        while out_open || err_open {
            let (stream, read) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.terminate(&mut child).await;
                    return Err(Error::Cancelled);
                }
                read = stdout.read(&mut out_chunk), if out_open => (Stream::Stdout, read),
                read = stderr.read(&mut err_chunk), if err_open => (Stream::Stderr, read),
            };

            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    self.fail(Error::Output(e));
                    return Err(self.stop(&mut child).await);
                }
            };
            if n == 0 {
                match stream {
                    Stream::Stdout => out_open = false,
                    Stream::Stderr => err_open = false,
                }
                continue;
            }

            let chunk = match stream {
                Stream::Stdout => &out_chunk[..n],
                Stream::Stderr => &err_chunk[..n],
            };
            self.buffer(stream).push(chunk);

            let flow = self.drain(stream, op, cancel, false).await?;
            if let Some(exit) = self.settle(flow, &mut child).await? {
                return Ok(exit);
            }
        }

        for stream in [Stream::Stdout, Stream::Stderr] {
            let flow = self.drain(stream, op, cancel, true).await?;
            if let Some(exit) = self.settle(flow, &mut child).await? {
                return Ok(exit);
            }
        }
        if let Some(entry) = self.parser.as_mut().and_then(|parser| parser.finish()) {
            self.held.push(entry);
        }

        self.stdin.take();
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.terminate(&mut child).await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };
        debug!(%status, mode = %self.mode, "archiver exited");
        Ok(Exit::Done(status))
    }

    fn buffer(&mut self, stream: Stream) -> &mut LineBuffer {
        match stream {
            Stream::Stdout => &mut self.stdout,
            Stream::Stderr => &mut self.stderr,
        }
    }

    /// Handle every complete line, then the unterminated tail if it looks
    /// like a prompt the tool is blocked on (or the stream has ended).
    async fn drain(&mut self, stream: Stream, op: &mut Operation, cancel: &CancelToken, at_end: bool) -> Result<Flow> {
        while let Some(line) = self.buffer(stream).next_line() {
            let flow = self.handle_line(&line, op, cancel).await?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }

        let table = self.table;
        let buffer = self.buffer(stream);
        if buffer.is_empty() {
            return Ok(Flow::Continue);
        }
        if at_end || table.patterns.is_blocking_prompt(&buffer.fragment()) {
            if let Some(fragment) = self.buffer(stream).take_fragment() {
                return self.handle_line(&fragment, op, cancel).await;
            }
        }
        Ok(Flow::Continue)
    }

    async fn settle(&mut self, flow: Flow, child: &mut Child) -> Result<Option<Exit>> {
        match flow {
            Flow::Continue => Ok(None),
            Flow::Stop => Err(self.stop(child).await),
            Flow::Restart => {
                self.kill(child).await;
                Ok(Some(Exit::Restart))
            }
            Flow::Cancel => {
                self.terminate(child).await;
                Err(Error::Cancelled)
            }
        }
    }

    /// Kill the tool and hand back the recorded error.
    async fn stop(&mut self, child: &mut Child) -> Error {
        self.kill(child).await;
        self.error
            .take()
            .unwrap_or_else(|| Error::Tool("archiver stopped".into()))
    }

    fn publish_entries(&mut self) {
        for entry in self.held.drain(..) {
            self.sink.entry(entry);
        }
    }

    async fn handle_line(&mut self, line: &str, op: &mut Operation, cancel: &CancelToken) -> Result<Flow> {
        let table = self.table;
        let patterns = &table.patterns;

        if patterns.password_prompt.is_match(line) {
            return self.on_password_prompt(op, cancel).await;
        }
        if patterns.wrong_password.is_match(line) {
            return Ok(self.on_wrong_password(op, cancel).await);
        }
        if patterns.overwrite_prompt.is_match(line) {
            return self.on_overwrite_prompt(line, op, cancel).await;
        }
        if patterns.rename_prompt.is_match(line) {
            return self.on_rename_prompt(line).await;
        }
        if let Some(file) = patterns.overwrite_file.capture(line, "file") {
            self.overwrite_file = Some(file);
            return Ok(Flow::Continue);
        }
        if patterns.disk_full.is_match(line) {
            self.fail(Error::DiskFull(line.to_string()));
            return Ok(Flow::Stop);
        }
        if patterns.corrupt_archive.is_match(line) {
            return Ok(self.on_corrupt(line, op, cancel).await);
        }
        if patterns.fatal_error.is_match(line) {
            self.fail(Error::Tool(line.to_string()));
            return Ok(Flow::Stop);
        }
        if patterns.extraction_failed.is_match(line) {
            self.fail(Error::Tool(line.to_string()));
            return Ok(Flow::Continue);
        }
        if patterns.multi_volume.is_match(line) {
            self.multi_volume = true;
            return Ok(Flow::Continue);
        }
        if patterns.test_passed.is_match(line) {
            self.test_passed = true;
            return Ok(Flow::Continue);
        }
        if let Some(percent) = patterns.progress.capture(line, "percent") {
            if let Ok(percent) = percent.parse::<f64>() {
                self.sink.progress(percent / 100.0);
            }
            return Ok(Flow::Continue);
        }

        if let Some(entry) = self.parser.as_mut().and_then(|parser| parser.parse_line(line)) {
            self.held.push(entry);
        }
        Ok(Flow::Continue)
    }

    /// Record an error and report it. The first one becomes the result.
    fn fail(&mut self, error: Error) {
        warn!(mode = %self.mode, error = %error, "archiver reported an error");
        self.sink.error(error.to_string());
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Ask a question, giving up if the operation is cancelled meanwhile.
    async fn ask(&self, query: Query, cancel: &CancelToken) -> Option<Answer> {
        tokio::select! {
            answer = self.queries.ask(query) => Some(answer),
            _ = cancel.cancelled() => None,
        }
    }

    async fn respond(&mut self, text: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Tool("archiver input is closed".into()))?;
        stdin.write_all(text.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        debug!(bytes = text.len() + 1, "answered archiver prompt");
        Ok(())
    }

    async fn on_password_prompt(&mut self, op: &mut Operation, cancel: &CancelToken) -> Result<Flow> {
        let stored = op.password.clone().filter(|_| !self.password_sent);
        let password = match stored {
            Some(password) => password,
            None => {
                // Prompted again after answering: the last one was rejected.
                let query = Query::Password {
                    archive: op.archive.clone(),
                    retry: self.password_sent,
                };
                match self.ask(query, cancel).await {
                    Some(Answer::Password(Some(password))) => password,
                    _ => return Ok(Flow::Cancel),
                }
            }
        };
        self.password_sent = true;
        self.respond(&password).await?;
        op.password = Some(password);
        Ok(Flow::Continue)
    }

    async fn on_wrong_password(&mut self, op: &mut Operation, cancel: &CancelToken) -> Flow {
        warn!(archive = %op.archive.display(), mode = %self.mode, "wrong password");
        op.password = None;
        if !self.mode.retries_password() {
            self.fail(Error::WrongPassword);
            return Flow::Stop;
        }
        let query = Query::Password {
            archive: op.archive.clone(),
            retry: true,
        };
        match self.ask(query, cancel).await {
            Some(Answer::Password(Some(password))) => {
                op.password = Some(password);
                Flow::Restart
            }
            _ => Flow::Cancel,
        }
    }

    async fn on_overwrite_prompt(&mut self, line: &str, op: &mut Operation, cancel: &CancelToken) -> Result<Flow> {
        let table = self.table;
        let file = table
            .patterns
            .overwrite_prompt
            .capture(line, "file")
            .or_else(|| self.overwrite_file.take())
            .unwrap_or_default();
        let multiple = op.files.len() != 1;

        let choice = tokio::select! {
            choice = op.overwrite.resolve(&self.queries, file, multiple) => choice,
            _ = cancel.cancelled() => return Ok(Flow::Cancel),
        };

        let keys = &table.overwrite;
        let key = match &choice {
            OverwriteChoice::Overwrite => keys.overwrite.clone(),
            OverwriteChoice::OverwriteAll => keys.overwrite_all.clone().or_else(|| keys.overwrite.clone()),
            OverwriteChoice::Skip => keys.skip.clone(),
            OverwriteChoice::AutoSkip => keys.autoskip.clone().or_else(|| keys.skip.clone()),
            OverwriteChoice::Rename(name) => match &keys.rename {
                Some(rename) => {
                    self.pending_rename = Some(name.clone());
                    Some(rename.clone())
                }
                None => {
                    warn!(format = %table.format, "renaming is not supported, skipping instead");
                    keys.skip.clone()
                }
            },
            OverwriteChoice::Cancel => {
                if let Some(cancel_key) = keys.cancel.clone() {
                    if let Err(e) = self.respond(&cancel_key).await {
                        debug!(error = %e, "could not pass cancel to archiver");
                    }
                }
                return Ok(Flow::Cancel);
            }
        };

        match key {
            Some(key) => {
                self.respond(&key).await?;
                Ok(Flow::Continue)
            }
            None => {
                warn!(format = %table.format, ?choice, "no response key for overwrite choice");
                Ok(Flow::Cancel)
            }
        }
    }

    async fn on_rename_prompt(&mut self, line: &str) -> Result<Flow> {
        match self.pending_rename.take() {
            Some(name) => {
                self.respond(&name).await?;
                Ok(Flow::Continue)
            }
            None => {
                self.fail(Error::Tool(format!("unexpected rename prompt: {line}")));
                Ok(Flow::Stop)
            }
        }
    }

    async fn on_corrupt(&mut self, line: &str, op: &mut Operation, cancel: &CancelToken) -> Flow {
        if self.mode == OperationMode::List {
            if self.loaded_corrupt {
                return Flow::Continue;
            }
            let query = Query::LoadCorrupt {
                archive: op.archive.clone(),
            };
            return match self.ask(query, cancel).await {
                Some(Answer::Confirm(true)) => {
                    info!(archive = %op.archive.display(), "loading corrupt archive");
                    self.loaded_corrupt = true;
                    Flow::Continue
                }
                _ => Flow::Cancel,
            };
        }

        if op.ignore_corrupt {
            self.sink.send(ArchiveEvent::Info(line.to_string()));
            return Flow::Continue;
        }
        let query = Query::ContinueAfterError {
            message: line.to_string(),
        };
        match self.ask(query, cancel).await {
            Some(Answer::Continue {
                proceed: true,
                dont_ask_again,
            }) => {
                op.ignore_corrupt = dont_ask_again;
                Flow::Continue
            }
            Some(_) => {
                self.fail(Error::Corrupt(line.to_string()));
                Flow::Stop
            }
            None => Flow::Cancel,
        }
    }

    async fn kill(&mut self, child: &mut Child) {
        self.stdin.take();
        if let Err(e) = child.kill().await {
            debug!(error = %e, "archiver already gone");
        }
    }

    /// Close input, ask the tool to stop, and kill it if it does not within
    /// the grace period.
    async fn terminate(&mut self, child: &mut Child) {
        self.stdin.take();
        #[cfg(unix)]
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(pid, error = %e, "failed to signal archiver");
            }
        }
        match tokio::time::timeout(self.config.grace_period, child.wait()).await {
            Ok(_) => debug!(mode = %self.mode, "archiver stopped"),
            Err(_) => {
                warn!(
                    grace = ?self.config.grace_period,
                    "archiver ignored termination, killing it"
                );
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "archiver already gone");
                }
            }
        }
    }

    fn conclude(&mut self, line: &CommandLine, status: ExitStatus) -> Result<()> {
        if let Some(parser) = &self.parser {
            let mut info = parser.archive_info();
            info.multi_volume |= self.multi_volume;
            if !info.is_empty() {
                self.sink.send(ArchiveEvent::ArchiveInfo(info));
            }
        }

        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.mode == OperationMode::List && self.loaded_corrupt {
            return Ok(());
        }
        if !self.table.is_success_code(status.code()) {
            self.fail(Error::Tool(format!(
                "{} exited with {status}",
                program_name(&line.program)
            )));
        } else if self.mode == OperationMode::Test
            && !self.table.patterns.test_passed.is_empty()
            && !self.test_passed
        {
            self.fail(Error::Tool("archive test did not pass".into()));
        }
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn program_name(program: &std::path::Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn read_failures_count_as_reported() {
        let read = Error::Output(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        assert!(reported_while_running(&read));
        assert_eq!(read.to_string(), "failed to read archiver output: pipe closed");

        let other = Error::Io(io::Error::other("write failed"));
        assert!(!reported_while_running(&other));
    }

    #[test]
    fn driver_futures_can_move_between_threads() {
        fn assert_send<T: Send>(_: &T) {}

        let table = ParameterTable::from_toml_str(
            r#"
            format = "none"
            [modes.list]
            programs = ["coffer-no-such-archiver"]
            args = ["$Archive"]
            "#,
        )
        .unwrap();
        let driver = CliDriver::new(Arc::new(table));
        let (sink, _rx) = EventSink::channel();
        let cancel = CancelToken::new();
        let mut op = Operation::new(OperationMode::List, "a");

        let run = driver.run(&mut op, &sink, &cancel);
        assert_send(&run);
    }
}
