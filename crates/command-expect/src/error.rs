//! Error types for interactive and disposable processes

use thiserror::Error;

/// Unified error type for process sessions
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// The child exited before the session could start talking to it
    #[error("process failed to start: exited immediately with code {code:?}")]
    ExitedAtLaunch {
        /// Exit code reported by the child, if any
        code: Option<i32>,
    },

    /// Writing to the child's stdin is no longer possible
    #[error("broken pipe: {reason}")]
    BrokenPipe {
        /// Why the pipe is unusable
        reason: String,
    },

    /// An argument violated the operation's preconditions
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A regular-expression pattern could not be compiled
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern as supplied by the caller
        pattern: String,
        /// The compilation error
        #[source]
        source: regex::Error,
    },

    /// `start` was called on a disposable process that is already running
    #[error("process already started")]
    AlreadyStarted,

    /// A disposable process resolved no launch arguments
    #[error("no launch arguments resolved")]
    MissingArgs,

    /// Collecting a child's output failed; the child was killed
    #[error("child process failed: {reason}")]
    ChildProcess {
        /// What went wrong while joining the child
        reason: String,
    },

    /// The line queue for a stream is drained and its drainer has exited
    #[error("{stream} closed")]
    StreamClosed {
        /// Name of the stream (`stdout` or `stderr`)
        stream: &'static str,
    },

    /// The drainer for a stream stopped on an I/O error
    #[error("{stream} failed: {reason}")]
    StreamFailed {
        /// Name of the stream (`stdout` or `stderr`)
        stream: &'static str,
        /// The I/O error reported by the drainer
        reason: String,
    },

    /// A deadline-bounded receive expired before a target line arrived
    #[error("timed out after {elapsed_ms}ms waiting for output")]
    Timeout {
        /// How long the call waited
        elapsed_ms: u128,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Create a broken pipe error
    pub fn broken_pipe(reason: impl Into<String>) -> Self {
        Self::BrokenPipe {
            reason: reason.into(),
        }
    }

    /// Create a child process error
    pub fn child_process(reason: impl Into<String>) -> Self {
        Self::ChildProcess {
            reason: reason.into(),
        }
    }

    /// Returns true for precondition violations made by the caller, as
    /// opposed to failures of the child process or the operating system.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::InvalidArgument(_)
                | Error::InvalidPattern { .. }
                | Error::AlreadyStarted
                | Error::MissingArgs
                | Error::Config(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
