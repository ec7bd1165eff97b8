//! Expect-style control of child processes
//!
//! This crate launches subprocesses and talks to them line by line. An
//! [`InteractiveProcess`] drains the child's stdout and stderr on background
//! threads, so the caller can send input and block until output matching a
//! pattern arrives. A [`DisposableProcess`] runs a one-shot [`Disposable`]
//! description to completion and keeps its exit code and output.

pub mod command;
pub mod config;
pub mod disposable;
mod drainer;
pub mod error;
pub mod event;
pub mod pattern;
pub mod process;
pub mod queue;
mod signal;

pub use command::{Command, LaunchArgs};
pub use config::ProcessConfig;
pub use disposable::{
    CompletedProcess, Disposable, DisposableProcess, LaunchOptions, LifecycleState,
};
pub use error::{Error, Result};
pub use event::{LineEvent, LineSink, LogSource, NoOpSink, TracingSink};
pub use pattern::{starts_with, MatchResult, Matcher, PatternMatch, PatternSpec};
pub use process::{Expect, InteractiveProcess};
pub use signal::exit_code;
