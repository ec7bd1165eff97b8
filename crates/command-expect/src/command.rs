//! Command type for describing how a child is launched

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;

use crate::error::{Error, Result};

/// What the platform launcher is asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchArgs {
    /// A command line interpreted by the platform shell
    Shell(String),
    /// An argument vector executed directly, without a shell
    Argv(Vec<String>),
}

impl LaunchArgs {
    /// Build an argument vector, coercing each token to text
    pub fn argv<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        LaunchArgs::Argv(tokens.into_iter().map(|t| t.to_string()).collect())
    }

    /// Returns true if there is nothing to launch
    pub fn is_empty(&self) -> bool {
        match self {
            LaunchArgs::Shell(line) => line.trim().is_empty(),
            LaunchArgs::Argv(argv) => argv.is_empty(),
        }
    }

    fn to_std(&self) -> Result<StdCommand> {
        if self.is_empty() {
            return Err(Error::MissingArgs);
        }
        let cmd = match self {
            LaunchArgs::Shell(line) => {
                #[cfg(unix)]
                let mut cmd = StdCommand::new("sh");
                #[cfg(unix)]
                cmd.arg("-c");

                #[cfg(not(unix))]
                let mut cmd = StdCommand::new("cmd");
                #[cfg(not(unix))]
                cmd.arg("/C");

                cmd.arg(line);
                cmd
            }
            LaunchArgs::Argv(argv) => {
                let mut cmd = StdCommand::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
        };
        Ok(cmd)
    }
}

impl From<&str> for LaunchArgs {
    fn from(line: &str) -> Self {
        LaunchArgs::Shell(line.to_string())
    }
}

impl From<String> for LaunchArgs {
    fn from(line: String) -> Self {
        LaunchArgs::Shell(line)
    }
}

impl From<Vec<String>> for LaunchArgs {
    fn from(argv: Vec<String>) -> Self {
        LaunchArgs::Argv(argv)
    }
}

impl From<&[&str]> for LaunchArgs {
    fn from(argv: &[&str]) -> Self {
        LaunchArgs::argv(argv)
    }
}

impl fmt::Display for LaunchArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchArgs::Shell(line) => f.write_str(line),
            LaunchArgs::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// A command to be executed
///
/// This is a builder for creating commands that can be converted to
/// `std::process::Command` when needed. Unlike the std type it is `Clone`,
/// so a description can be launched more than once.
#[derive(Debug, Clone)]
pub struct Command {
    /// What to run
    launch: LaunchArgs,
    /// Environment variables to set
    env: HashMap<OsString, OsString>,
    /// Working directory for the command
    current_dir: Option<PathBuf>,
    /// Whether to clear the environment before setting our vars
    env_clear: bool,
}

impl Command {
    /// Create a new command for the given program, run without a shell
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self::from_args(LaunchArgs::Argv(vec![program.into()]))
    }

    /// Create a command line interpreted by the platform shell
    pub fn shell<S: Into<String>>(line: S) -> Self {
        Self::from_args(LaunchArgs::Shell(line.into()))
    }

    /// Create a command from an already resolved launch description
    pub fn from_args(launch: LaunchArgs) -> Self {
        Self {
            launch,
            env: HashMap::new(),
            current_dir: None,
            env_clear: false,
        }
    }

    /// Add an argument to the command
    ///
    /// For shell commands the argument is appended to the command line,
    /// separated by a space.
    pub fn arg<S: fmt::Display>(&mut self, arg: S) -> &mut Self {
        match &mut self.launch {
            LaunchArgs::Argv(argv) => argv.push(arg.to_string()),
            LaunchArgs::Shell(line) => {
                line.push(' ');
                line.push_str(&arg.to_string());
            }
        }
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Set multiple environment variables
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, val) in vars {
            self.env(key, val);
        }
        self
    }

    /// Clear all environment variables (except those explicitly set)
    pub fn env_clear(&mut self) -> &mut Self {
        self.env_clear = true;
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Get the launch description
    pub fn get_args(&self) -> &LaunchArgs {
        &self.launch
    }

    /// Get the environment variables
    pub fn get_envs(&self) -> &HashMap<OsString, OsString> {
        &self.env
    }

    /// Get the current directory
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Prepare this command for execution by converting to a `std::process::Command`
    ///
    /// Stdio is left untouched; callers decide what gets piped. Fails with
    /// [`Error::MissingArgs`] when there is nothing to launch.
    pub fn prepare(&self) -> Result<StdCommand> {
        let mut cmd = self.launch.to_std()?;

        if self.env_clear {
            cmd.env_clear();
        }
        for (key, val) in &self.env {
            cmd.env(key, val);
        }

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        Ok(cmd)
    }
}

/// Builder pattern helper
impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: Into<String>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for more ergonomic command construction
#[derive(Debug)]
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: fmt::Display>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: fmt::Display,
    {
        self.0.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.0.env(key, val);
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.0.current_dir(dir);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}
