//! Drained output lines and the diagnostic sink they are mirrored to

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source of a drained line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl LogSource {
    /// Stream name as used in thread names and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line read from one of the child's output streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineEvent {
    /// When the drainer read the line
    pub timestamp: DateTime<Utc>,
    /// Which stream it came from
    pub source: LogSource,
    /// The line, without its terminator
    pub line: String,
}

impl LineEvent {
    /// Create a new line event stamped with the current time
    pub fn new(source: LogSource, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            line: line.into(),
        }
    }
}

/// Receives every drained line when a session runs in verbose mode
///
/// Implementations are called from the drainer threads and must neither
/// block for long nor panic.
pub trait LineSink: Send + Sync {
    /// Handle one drained line
    fn line(&self, event: &LineEvent);
}

/// Mirrors drained lines into `tracing` at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, event: &LineEvent) {
        tracing::info!(stream = %event.source, "{}", event.line);
    }
}

/// A sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSink;

impl LineSink for NoOpSink {
    fn line(&self, _event: &LineEvent) {}
}
