//! One-shot processes with lifecycle hooks
//!
//! Implement [`Disposable`] to describe a process that is configured once,
//! run to completion and then inspected, and drive it with
//! [`DisposableProcess`]. Hooks run in this order:
//!
//! ```text
//! start():  on_pre_start -> resolve_args -> resolve_options
//!           -> on_before_launch -> (launch) -> on_after_launch
//! join():   on_before_join -> (collect output, wait) -> on_after_join
//! ```

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use tracing::{debug, warn};

use crate::command::{Command, LaunchArgs};
use crate::error::{Error, Result};
use crate::signal;

/// Return code reported by [`DisposableProcess::run`] when none is available
pub const UNKNOWN_RETURNCODE: i32 = 1;

/// Extra launch settings besides the arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Environment variables to set
    pub env: HashMap<OsString, OsString>,
    /// Start from an empty environment
    pub env_clear: bool,
    /// Working directory
    pub current_dir: Option<PathBuf>,
}

impl LaunchOptions {
    fn apply(&self, command: &mut Command) {
        if self.env_clear {
            command.env_clear();
        }
        command.envs(&self.env);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
    }
}

/// Describes a one-shot process
///
/// Only [`resolve_args`](Disposable::resolve_args) is required; every hook
/// defaults to doing nothing. A hook returning an error aborts the
/// operation it belongs to.
pub trait Disposable {
    /// Called first on every `start`, even one that will fail as a repeat
    fn on_pre_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// What to launch; `None` or an empty value fails the start
    fn resolve_args(&mut self) -> Option<LaunchArgs>;

    /// Environment and working directory for the launch
    fn resolve_options(&mut self) -> LaunchOptions {
        LaunchOptions::default()
    }

    /// Called right before the child is spawned
    fn on_before_launch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called right after the child is spawned
    fn on_after_launch(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before output collection starts
    fn on_before_join(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after the child exited and its output was collected
    fn on_after_join(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Where a [`DisposableProcess`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not started yet
    Created,
    /// Running
    Started,
    /// Exited and collected
    Joined,
}

/// Outcome of [`DisposableProcess::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    /// What was launched
    pub args: LaunchArgs,
    /// Exit code, `-signal` for a signal death on Unix
    pub returncode: i32,
    /// Everything written to stdout
    pub stdout: String,
    /// Everything written to stderr
    pub stderr: String,
}

impl CompletedProcess {
    /// Returns true if the process exited with code 0
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

/// Drives a [`Disposable`] through start and join
#[derive(Debug)]
pub struct DisposableProcess<D> {
    inner: D,
    state: LifecycleState,
    child: Option<Child>,
    args: Option<LaunchArgs>,
    returncode: Option<i32>,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl<D: Disposable> DisposableProcess<D> {
    /// Wrap a process description
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            state: LifecycleState::Created,
            child: None,
            args: None,
            returncode: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Launch the process
    ///
    /// Fails with [`Error::AlreadyStarted`] on a second call and with
    /// [`Error::MissingArgs`] if nothing to launch was resolved.
    pub fn start(&mut self) -> Result<()> {
        self.inner.on_pre_start()?;
        if self.state != LifecycleState::Created {
            return Err(Error::AlreadyStarted);
        }

        let args = self
            .inner
            .resolve_args()
            .filter(|args| !args.is_empty())
            .ok_or(Error::MissingArgs)?;
        let options = self.inner.resolve_options();

        let mut command = Command::from_args(args.clone());
        options.apply(&mut command);
        let mut cmd = command.prepare()?;
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        self.inner.on_before_launch()?;
        let child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("Failed to spawn `{}`: {}", args, e)))?;
        debug!(pid = child.id(), args = %args, "started disposable process");

        self.child = Some(child);
        self.args = Some(args);
        self.state = LifecycleState::Started;
        self.inner.on_after_launch()
    }

    /// Wait for the process and collect its output
    ///
    /// Does nothing unless the process is started and not yet joined. On
    /// failure a still-running child is killed and [`Error::ChildProcess`]
    /// returned; the return code and whatever output was captured are
    /// recorded either way.
    pub fn join(&mut self) -> Result<()> {
        if self.state != LifecycleState::Started || self.returncode.is_some() {
            return Ok(());
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let outcome = collect(&mut self.inner, &mut child, &mut stdout, &mut stderr);

        if let Err(e) = &outcome {
            // A child reaped before the failure has a recycled pid; leave it alone.
            if matches!(child.try_wait(), Ok(None)) {
                warn!(pid = child.id(), error = %e, "join failed, killing process");
                let _ = signal::kill(&mut child);
                let _ = child.wait();
            } else {
                warn!(pid = child.id(), error = %e, "join failed after process exited");
            }
        }

        self.returncode = child
            .try_wait()
            .ok()
            .flatten()
            .and_then(|status| signal::exit_code(&status));
        self.stdout = Some(String::from_utf8_lossy(&stdout).into_owned());
        self.stderr = Some(String::from_utf8_lossy(&stderr).into_owned());
        self.state = LifecycleState::Joined;
        debug!(pid = child.id(), returncode = ?self.returncode, "joined disposable process");

        outcome.map_err(|e| Error::child_process(e.to_string()))
    }

    /// Start, join and report the result
    pub fn run(&mut self) -> Result<CompletedProcess> {
        self.start()?;
        self.join()?;
        Ok(CompletedProcess {
            args: self.args.clone().unwrap_or(LaunchArgs::Argv(Vec::new())),
            returncode: self.returncode.unwrap_or(UNKNOWN_RETURNCODE),
            stdout: self.stdout.clone().unwrap_or_default(),
            stderr: self.stderr.clone().unwrap_or_default(),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Returns true once `start` succeeded
    pub fn is_started(&self) -> bool {
        self.state != LifecycleState::Created
    }

    /// Process ID while the child is running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// What was launched, once started
    pub fn args(&self) -> Option<&LaunchArgs> {
        self.args.as_ref()
    }

    /// Exit code, once joined
    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Captured stdout, once joined
    pub fn stdout(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    /// Captured stderr, once joined
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    /// The wrapped description
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// The wrapped description, mutably
    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }
}

impl<D> Drop for DisposableProcess<D> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = signal::kill(&mut child);
            }
            let _ = child.wait();
        }
    }
}

fn collect<D: Disposable>(
    inner: &mut D,
    child: &mut Child,
    stdout: &mut Vec<u8>,
    stderr: &mut Vec<u8>,
) -> Result<()> {
    inner.on_before_join()?;

    let out_pipe = child.stdout.take();
    let err_pipe = child.stderr.take();
    std::thread::scope(|scope| -> Result<()> {
        let err_reader = scope.spawn(move || -> std::io::Result<()> {
            if let Some(mut pipe) = err_pipe {
                pipe.read_to_end(stderr)?;
            }
            Ok(())
        });
        let out_result = match out_pipe {
            Some(mut pipe) => pipe.read_to_end(stdout).map(|_| ()),
            None => Ok(()),
        };
        let err_result = err_reader
            .join()
            .map_err(|_| Error::child_process("stderr reader panicked"))?;
        out_result?;
        err_result?;
        Ok(())
    })?;

    child.wait()?;
    inner.on_after_join()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unresolved;

    impl Disposable for Unresolved {
        fn resolve_args(&mut self) -> Option<LaunchArgs> {
            None
        }
    }

    #[test]
    fn test_join_before_start_is_noop() {
        let mut process = DisposableProcess::new(Unresolved);
        process.join().unwrap();
        assert_eq!(process.state(), LifecycleState::Created);
        assert_eq!(process.returncode(), None);
        assert_eq!(process.stdout(), None);
    }

    #[test]
    fn test_missing_args_is_usage_error() {
        let mut process = DisposableProcess::new(Unresolved);
        let err = process.start().unwrap_err();
        assert!(matches!(err, Error::MissingArgs));
        assert!(err.is_usage());
        assert!(!process.is_started());
    }

    #[test]
    fn test_launch_options_apply() {
        let mut options = LaunchOptions::default();
        options.env.insert("KEY".into(), "VALUE".into());
        options.current_dir = Some(PathBuf::from("/tmp"));

        let mut command = Command::new("env");
        options.apply(&mut command);
        assert_eq!(
            command.get_envs().get(&OsString::from("KEY")),
            Some(&OsString::from("VALUE"))
        );
        assert_eq!(command.get_current_dir(), Some(std::path::Path::new("/tmp")));
    }
}
