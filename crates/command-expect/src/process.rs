//! Interactive child processes
//!
//! An [`InteractiveProcess`] owns a child with all three standard streams
//! piped. Two drainer threads move stdout and stderr into line queues while
//! the caller talks to the child with [`send`](InteractiveProcess::send) and
//! waits for answers with [`recv`](InteractiveProcess::recv).
//!
//! ```no_run
//! use command_expect::{Command, Expect, InteractiveProcess};
//!
//! # fn main() -> command_expect::Result<()> {
//! let mut repl = InteractiveProcess::spawn(Command::builder("python3").arg("-i").build())?;
//! repl.send(["print(6 * 7)"])?;
//! let lines = repl.recv(&Expect::new([r"\d+"]).targets_regex(true))?;
//! assert_eq!(lines.last().map(String::as_str), Some("42"));
//! repl.stop()?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::command::{Command, LaunchArgs};
use crate::config::ProcessConfig;
use crate::drainer::{DrainerContext, StreamDrainer};
use crate::error::{Error, Result};
use crate::event::{LineSink, LogSource, TracingSink};
use crate::pattern::{Matcher, PatternSpec};
use crate::queue::{line_channel, LineReceiver};
use crate::signal;

/// What a `recv` call waits for
///
/// Lines are consumed until one matches the targets; that line is the last
/// one returned. With heads set, lines up to and including the first head
/// match are discarded first. The `*_case` flags make matching
/// case-insensitive.
#[derive(Debug, Clone)]
pub struct Expect {
    targets: PatternSpec,
    heads: Option<PatternSpec>,
    targets_regex: bool,
    targets_case: bool,
    heads_regex: bool,
    heads_case: bool,
}

impl Expect {
    /// Wait for a line starting with one of `targets`
    pub fn new(targets: impl Into<PatternSpec>) -> Self {
        Self {
            targets: targets.into(),
            heads: None,
            targets_regex: false,
            targets_case: false,
            heads_regex: false,
            heads_case: false,
        }
    }

    /// Discard lines through the first one starting with one of `heads`
    pub fn heads(mut self, heads: impl Into<PatternSpec>) -> Self {
        self.heads = Some(heads.into());
        self
    }

    /// Treat targets as regular expressions
    pub fn targets_regex(mut self, regex: bool) -> Self {
        self.targets_regex = regex;
        self
    }

    /// Match targets case-insensitively
    pub fn targets_case(mut self, ignore_case: bool) -> Self {
        self.targets_case = ignore_case;
        self
    }

    /// Treat heads as regular expressions
    pub fn heads_regex(mut self, regex: bool) -> Self {
        self.heads_regex = regex;
        self
    }

    /// Match heads case-insensitively
    pub fn heads_case(mut self, ignore_case: bool) -> Self {
        self.heads_case = ignore_case;
        self
    }

    fn compile(&self) -> Result<(Option<Matcher>, Matcher)> {
        if self.targets.is_empty() {
            return Err(Error::InvalidArgument("targets is empty".into()));
        }
        let targets = self
            .targets
            .clone()
            .regex(self.targets_regex)
            .ignore_case(self.targets_case);

        let heads = match &self.heads {
            Some(heads) if heads.is_empty() => {
                return Err(Error::InvalidArgument("heads is empty".into()));
            }
            Some(heads) => {
                let spec = heads
                    .clone()
                    .regex(self.heads_regex)
                    .ignore_case(self.heads_case);
                Some(Matcher::new(&spec)?)
            }
            None => None,
        };

        Ok((heads, Matcher::new(&targets)?))
    }
}

/// A child process driven line by line
pub struct InteractiveProcess {
    args: LaunchArgs,
    label: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    stdin: Option<ChildStdin>,
    stdout: LineReceiver,
    stderr: LineReceiver,
    stop_signal: Arc<AtomicBool>,
    drainers: Vec<StreamDrainer>,
    stop_timeout: Duration,
    stopped: bool,
}

impl std::fmt::Debug for InteractiveProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveProcess")
            .field("args", &self.args)
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fail with [`Error::ExitedAtLaunch`] if `child` is already gone
///
/// Only a child that has exited by this single check is caught; a command
/// that exits a moment later starts normally and its output stays readable.
fn ensure_running(child: &mut Child) -> Result<()> {
    match child.try_wait()? {
        Some(status) => Err(Error::ExitedAtLaunch {
            code: signal::exit_code(&status),
        }),
        None => Ok(()),
    }
}

impl InteractiveProcess {
    /// Launch `command` with default configuration
    ///
    /// Fails with [`Error::ExitedAtLaunch`] if the child is already dead
    /// when first checked, which a fast-exiting command may or may not be.
    pub fn spawn(command: Command) -> Result<Self> {
        Self::spawn_with_config(command, ProcessConfig::default())
    }

    /// Launch `command`; verbose sessions mirror lines into `tracing`
    pub fn spawn_with_config(command: Command, config: ProcessConfig) -> Result<Self> {
        Self::launch(command, config, None)
    }

    /// Launch `command`, mirroring lines to `sink` when `config.verbose` is set
    pub fn spawn_with_sink(
        command: Command,
        config: ProcessConfig,
        sink: Arc<dyn LineSink>,
    ) -> Result<Self> {
        Self::launch(command, config, Some(sink))
    }

    fn launch(
        command: Command,
        config: ProcessConfig,
        sink: Option<Arc<dyn LineSink>>,
    ) -> Result<Self> {
        config.validate()?;

        let args = command.get_args().clone();
        let mut cmd = command.prepare()?;
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("Failed to spawn `{}`: {}", args, e)))?;
        ensure_running(&mut child)?;

        let pid = child.id();
        let label = config
            .label
            .clone()
            .unwrap_or_else(|| format!("proc-{pid}"));

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::spawn_failed("child stdio was not piped"));
        };

        let child = Arc::new(Mutex::new(child));
        let stop_signal = Arc::new(AtomicBool::new(false));

        let probe = Arc::clone(&child);
        let sink = if config.verbose {
            Some(sink.unwrap_or_else(|| Arc::new(TracingSink)))
        } else {
            None
        };
        let ctx = DrainerContext {
            label: label.clone(),
            stop: Arc::clone(&stop_signal),
            exited: Arc::new(move || !matches!(lock(&probe).try_wait(), Ok(None))),
            sink,
            poll_interval: config.poll_interval(),
        };

        let (stdout_tx, stdout_rx) = line_channel(LogSource::Stdout);
        let (stderr_tx, stderr_rx) = line_channel(LogSource::Stderr);

        let mut drainers = Vec::with_capacity(2);
        let spawned = StreamDrainer::spawn(LogSource::Stdout, stdout, stdout_tx, ctx.clone())
            .and_then(|d| {
                drainers.push(d);
                StreamDrainer::spawn(LogSource::Stderr, stderr, stderr_tx, ctx)
            });
        match spawned {
            Ok(d) => drainers.push(d),
            Err(e) => {
                stop_signal.store(true, Ordering::Release);
                let mut child = lock(&child);
                let _ = child.kill();
                let _ = child.wait();
                drop(child);
                for drainer in drainers {
                    drainer.join();
                }
                return Err(e);
            }
        }

        info!(pid, label = %label, args = %args, "started interactive process");

        Ok(Self {
            args,
            label,
            pid,
            child,
            stdin: Some(stdin),
            stdout: stdout_rx,
            stderr: stderr_rx,
            stop_signal,
            drainers,
            stop_timeout: config.stop_timeout(),
            stopped: false,
        })
    }

    /// The process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// What was launched
    pub fn args(&self) -> &LaunchArgs {
        &self.args
    }

    /// Label used in thread names and logs
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write one line to the child's stdin
    ///
    /// The parts are joined with single spaces and a newline is appended.
    /// Returns the joined text without the newline.
    pub fn send<I, T>(&mut self, parts: I) -> Result<String>
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        let line = parts
            .into_iter()
            .map(|part| part.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::broken_pipe("stdin is closed"))?;

        let written = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        if let Err(e) = written {
            return Err(match e.kind() {
                io::ErrorKind::BrokenPipe => {
                    self.stdin = None;
                    Error::broken_pipe(e.to_string())
                }
                _ => Error::Io(e),
            });
        }

        debug!(pid = self.pid, "sent {:?}", line);
        Ok(line)
    }

    /// Send a single line as is
    pub fn send_line(&mut self, line: &str) -> Result<String> {
        self.send([line])
    }

    /// Close the child's stdin so it sees end of input
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Consume stdout lines up to and including the first target match
    ///
    /// Blocks until the target arrives. Fails with [`Error::StreamClosed`]
    /// once stdout is exhausted, so a session that has been stopped never
    /// blocks forever. Consumed lines are not returned to the queue.
    pub fn recv(&mut self, expect: &Expect) -> Result<Vec<String>> {
        self.recv_from(LogSource::Stdout, expect, None)
    }

    /// Like [`recv`](Self::recv), but fails with [`Error::Timeout`] after `timeout`
    ///
    /// Lines consumed before the deadline passed are dropped.
    pub fn recv_timeout(&mut self, expect: &Expect, timeout: Duration) -> Result<Vec<String>> {
        let started = Instant::now();
        self.recv_from(LogSource::Stdout, expect, Some(started + timeout))
            .map_err(|e| match e {
                Error::Timeout { .. } => Error::Timeout {
                    elapsed_ms: started.elapsed().as_millis(),
                },
                other => other,
            })
    }

    /// [`recv`](Self::recv) on the stderr queue
    pub fn recv_stderr(&mut self, expect: &Expect) -> Result<Vec<String>> {
        self.recv_from(LogSource::Stderr, expect, None)
    }

    /// Take every stderr line buffered right now
    pub fn drain_stderr(&mut self) -> Vec<String> {
        self.stderr.drain_ready()
    }

    fn recv_from(
        &mut self,
        source: LogSource,
        expect: &Expect,
        deadline: Option<Instant>,
    ) -> Result<Vec<String>> {
        let (heads, targets) = expect.compile()?;
        let queue = match source {
            LogSource::Stdout => &mut self.stdout,
            LogSource::Stderr => &mut self.stderr,
        };

        if let Some(heads) = heads {
            loop {
                let found = heads.is_match(queue.peek(deadline)?);
                let skipped = queue.pop(deadline)?;
                trace!(pid = self.pid, stream = %source, "skipped {:?}", skipped);
                if found {
                    break;
                }
            }
        }

        let mut lines = Vec::new();
        loop {
            let line = queue.pop(deadline)?;
            let done = targets.is_match(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Exit status if the child has exited
    pub fn try_wait(&self) -> Result<Option<ExitStatus>> {
        Ok(lock(&self.child).try_wait()?)
    }

    /// Returns true while the child has not exited
    pub fn is_running(&self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait up to `timeout` for the child to exit; `Ok(None)` if it did not
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<ExitStatus>> {
        // The lock is only held per poll so the drainers' exit probes keep running.
        signal::wait_timeout_with(|| self.try_wait(), timeout)
    }

    /// Send SIGINT to the child
    pub fn interrupt(&self) -> Result<()> {
        signal::interrupt(&mut lock(&self.child))
    }

    /// Shut the session down using the configured stop timeout
    pub fn stop(&mut self) -> Result<()> {
        self.stop_with_timeout(self.stop_timeout)
    }

    /// Shut the session down
    ///
    /// Drainers are stopped and joined, stdin is closed, and a live child is
    /// sent SIGTERM, then SIGKILL if it is still running after `timeout`.
    /// Lines already queued stay readable. Calling this again is a no-op. If
    /// a step fails the child is killed before the error is returned.
    pub fn stop_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let result = self.shutdown(timeout);
        if let Err(e) = &result {
            warn!(pid = self.pid, error = %e, "stop failed, killing process");
            self.kill_now();
        }
        self.stopped = true;
        result
    }

    fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        let exited = self.try_wait()?.is_some();
        if !exited {
            // An exited child's drainers finish on their own, after draining.
            self.stop_signal.store(true, Ordering::Release);
        }
        self.join_drainers();
        self.stdin = None;

        if exited {
            debug!(pid = self.pid, "process already exited");
            return Ok(());
        }

        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Err(e) = signal::terminate(&mut child) {
            warn!(pid = self.pid, error = %e, "graceful terminate failed");
        }
        if let Some(status) = signal::wait_timeout(&mut child, timeout)? {
            info!(pid = self.pid, code = ?signal::exit_code(&status), "process terminated");
            return Ok(());
        }

        warn!(
            pid = self.pid,
            timeout_ms = timeout.as_millis() as u64,
            "process ignored terminate, killing"
        );
        if let Err(e) = signal::kill(&mut child) {
            if child.try_wait()?.is_none() {
                return Err(e);
            }
        }
        let status = child.wait()?;
        info!(pid = self.pid, code = ?signal::exit_code(&status), "process killed");
        Ok(())
    }

    /// Kill a live child without a grace period and join the drainers
    fn kill_now(&mut self) {
        self.stop_signal.store(true, Ordering::Release);
        self.stdin = None;
        {
            let mut child = lock(&self.child);
            if matches!(child.try_wait(), Ok(None)) {
                let _ = signal::kill(&mut child);
                let _ = child.wait();
            }
        }
        self.join_drainers();
    }

    fn join_drainers(&mut self) {
        for drainer in self.drainers.drain(..) {
            let summary = drainer.join();
            debug!(pid = self.pid, lines = summary.lines, end = ?summary.end, "drainer joined");
        }
    }
}

impl Drop for InteractiveProcess {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Kill rather than terminate so drop never waits on the child.
        self.kill_now();
    }
}
