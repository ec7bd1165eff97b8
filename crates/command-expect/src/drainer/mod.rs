//! Stream drainers
//!
//! A drainer is an OS thread that moves lines from one of the child's output
//! pipes into a [`LineSender`]. It checks the stop signal and the child's
//! liveness between bounded reads, so it never blocks the session for longer
//! than one poll interval.

mod nonblock;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{LineEvent, LineSink, LogSource};
use crate::queue::LineSender;

pub(crate) use nonblock::Pipe;
use nonblock::{Chunk, NonBlockingReader};

const READ_BUF_SIZE: usize = 4096;

/// Reports whether the owning process has exited
pub(crate) type ExitProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Everything a drainer needs besides its pipe and queue
#[derive(Clone)]
pub(crate) struct DrainerContext {
    pub label: String,
    pub stop: Arc<AtomicBool>,
    pub exited: ExitProbe,
    pub sink: Option<Arc<dyn LineSink>>,
    pub poll_interval: Duration,
}

/// Why a drainer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DrainEnd {
    /// The stop signal was raised
    Stopped,
    /// The pipe reached end of file
    Eof,
    /// The child exited and the remaining output was drained
    ProcessExited,
    /// A read failed while the child was still alive
    Failed(String),
}

/// What a drainer did over its lifetime
#[derive(Debug, Clone)]
pub(crate) struct DrainSummary {
    pub lines: usize,
    pub end: DrainEnd,
}

/// Handle to a running drainer thread
pub(crate) struct StreamDrainer {
    source: LogSource,
    handle: JoinHandle<DrainSummary>,
}

impl StreamDrainer {
    /// Start draining `pipe` into `tx` on a new thread
    pub(crate) fn spawn<R: Pipe>(
        source: LogSource,
        pipe: R,
        tx: LineSender,
        ctx: DrainerContext,
    ) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name(format!("{}-{}", ctx.label, source))
            .spawn(move || drain(source, pipe, tx, ctx))?;
        Ok(Self { source, handle })
    }

    /// Wait for the thread to finish
    pub(crate) fn join(self) -> DrainSummary {
        match self.handle.join() {
            Ok(summary) => summary,
            Err(_) => {
                warn!(stream = %self.source, "drainer thread panicked");
                DrainSummary {
                    lines: 0,
                    end: DrainEnd::Failed("drainer thread panicked".into()),
                }
            }
        }
    }
}

/// Splits a byte stream into lines without their terminators
#[derive(Debug, Default)]
struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(String)) {
        for &byte in bytes {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                emit(decode(raw));
            } else {
                self.partial.push(byte);
            }
        }
    }

    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode(std::mem::take(&mut self.partial)))
        }
    }
}

fn decode(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

struct Emitter {
    source: LogSource,
    tx: LineSender,
    sink: Option<Arc<dyn LineSink>>,
    lines: usize,
}

impl Emitter {
    fn emit(&mut self, line: String) {
        if let Some(sink) = &self.sink {
            sink.line(&LineEvent::new(self.source, line.as_str()));
        }
        if self.tx.push(line) {
            self.lines += 1;
        }
    }
}

fn drain<R: Pipe>(
    source: LogSource,
    pipe: R,
    tx: LineSender,
    ctx: DrainerContext,
) -> DrainSummary {
    let mut emitter = Emitter {
        source,
        tx,
        sink: ctx.sink.clone(),
        lines: 0,
    };

    let mut reader = match NonBlockingReader::new(pipe) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(stream = %source, error = %e, "failed to prepare pipe for draining");
            let reason = e.to_string();
            emitter.tx.fail(reason.clone());
            return DrainSummary {
                lines: 0,
                end: DrainEnd::Failed(reason),
            };
        }
    };

    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; READ_BUF_SIZE];

    let end = loop {
        if ctx.stop.load(Ordering::Acquire) {
            break DrainEnd::Stopped;
        }

        if (ctx.exited)() {
            // Whatever the child wrote before exiting is already in the pipe.
            loop {
                match reader.read_now(&mut buf) {
                    Ok(Chunk::Data(n)) => splitter.feed(&buf[..n], |line| emitter.emit(line)),
                    Ok(Chunk::Idle) | Ok(Chunk::Eof) | Err(_) => break,
                }
            }
            break DrainEnd::ProcessExited;
        }

        match reader.read_chunk(&mut buf, ctx.poll_interval) {
            Ok(Chunk::Data(n)) => splitter.feed(&buf[..n], |line| emitter.emit(line)),
            Ok(Chunk::Idle) => continue,
            Ok(Chunk::Eof) => break DrainEnd::Eof,
            Err(_) if (ctx.exited)() => break DrainEnd::ProcessExited,
            Err(e) => {
                warn!(stream = %source, error = %e, "read failed, stopping drainer");
                break DrainEnd::Failed(e.to_string());
            }
        }
    };

    if let Some(rest) = splitter.finish() {
        emitter.emit(rest);
    }

    debug!(stream = %source, lines = emitter.lines, end = ?end, "drainer finished");

    let Emitter { tx, lines, .. } = emitter;
    if let DrainEnd::Failed(reason) = &end {
        tx.fail(reason.clone());
    }

    DrainSummary { lines, end }
}
