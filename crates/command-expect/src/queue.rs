//! Line queues between a drainer and its consumer
//!
//! Each queue is an unbounded `async-channel` with exactly one producer.
//! The producer closes the queue by dropping its [`LineSender`]; once the
//! buffered lines have been consumed the [`LineReceiver`] reports that
//! instead of blocking forever.

use async_channel::{Receiver, Sender, TryRecvError};
use async_io::Timer;
use futures_lite::{future, FutureExt};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::event::LogSource;

#[derive(Debug)]
enum Frame {
    Line(String),
    /// Last frame sent by a drainer that stopped on an I/O error
    Failed(String),
}

enum Wait {
    Frame(Frame),
    Closed,
    Expired,
}

/// Create a connected sender/receiver pair for one stream
pub fn line_channel(source: LogSource) -> (LineSender, LineReceiver) {
    let (tx, rx) = async_channel::unbounded();
    (
        LineSender { tx },
        LineReceiver {
            source,
            rx,
            lookahead: None,
            failure: None,
        },
    )
}

/// Producer half, owned by a drainer
#[derive(Debug)]
pub struct LineSender {
    tx: Sender<Frame>,
}

impl LineSender {
    /// Enqueue a line; returns false if the consumer is gone
    pub fn push(&self, line: String) -> bool {
        self.tx.try_send(Frame::Line(line)).is_ok()
    }

    /// Record the error that ended the stream and close the queue
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.try_send(Frame::Failed(reason.into()));
    }
}

/// Consumer half, owned by the session
///
/// Supports peeking at the oldest line without removing it.
#[derive(Debug)]
pub struct LineReceiver {
    source: LogSource,
    rx: Receiver<Frame>,
    lookahead: Option<String>,
    failure: Option<String>,
}

impl LineReceiver {
    /// Which stream this queue carries
    pub fn source(&self) -> LogSource {
        self.source
    }

    /// Number of lines buffered right now
    pub fn len(&self) -> usize {
        self.rx.len() + usize::from(self.lookahead.is_some())
    }

    /// Returns true if no line is buffered right now
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peek at the oldest line, blocking until one arrives
    ///
    /// With a deadline, fails with [`Error::Timeout`] once it passes.
    pub fn peek(&mut self, deadline: Option<Instant>) -> Result<&str> {
        self.fill(deadline)?;
        Ok(self.lookahead.as_deref().unwrap_or_default())
    }

    /// Remove the oldest line, blocking until one arrives
    pub fn pop(&mut self, deadline: Option<Instant>) -> Result<String> {
        self.fill(deadline)?;
        Ok(self.lookahead.take().unwrap_or_default())
    }

    /// Remove the oldest line if one is buffered
    ///
    /// Returns `Ok(None)` when the queue is empty but still open.
    pub fn try_pop(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.lookahead.take() {
            return Ok(Some(line));
        }
        if self.failure.is_some() {
            return Err(self.closed_error());
        }
        match self.rx.try_recv() {
            Ok(Frame::Line(line)) => Ok(Some(line)),
            Ok(Frame::Failed(reason)) => {
                self.failure = Some(reason);
                Err(self.closed_error())
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(self.closed_error()),
        }
    }

    /// Remove every line buffered right now without blocking
    pub fn drain_ready(&mut self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.len());
        while let Ok(Some(line)) = self.try_pop() {
            lines.push(line);
        }
        lines
    }

    fn fill(&mut self, deadline: Option<Instant>) -> Result<()> {
        if self.lookahead.is_some() {
            return Ok(());
        }
        if self.failure.is_some() {
            return Err(self.closed_error());
        }

        let started = Instant::now();
        let rx = &self.rx;
        let outcome = match deadline {
            None => match rx.recv_blocking() {
                Ok(frame) => Wait::Frame(frame),
                Err(_) => Wait::Closed,
            },
            Some(deadline) => future::block_on(async {
                let recv = async {
                    match rx.recv().await {
                        Ok(frame) => Wait::Frame(frame),
                        Err(_) => Wait::Closed,
                    }
                };
                let expire = async {
                    Timer::at(deadline).await;
                    Wait::Expired
                };
                recv.or(expire).await
            }),
        };

        match outcome {
            Wait::Frame(Frame::Line(line)) => {
                self.lookahead = Some(line);
                Ok(())
            }
            Wait::Frame(Frame::Failed(reason)) => {
                self.failure = Some(reason);
                Err(self.closed_error())
            }
            Wait::Closed => Err(self.closed_error()),
            Wait::Expired => Err(Error::Timeout {
                elapsed_ms: started.elapsed().as_millis(),
            }),
        }
    }

    fn closed_error(&self) -> Error {
        match &self.failure {
            Some(reason) => Error::StreamFailed {
                stream: self.source.as_str(),
                reason: reason.clone(),
            },
            None => Error::StreamClosed {
                stream: self.source.as_str(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lines_keep_order() {
        let (tx, mut rx) = line_channel(LogSource::Stdout);
        for i in 0..5 {
            assert!(tx.push(format!("line {i}")));
        }
        for i in 0..5 {
            assert_eq!(rx.pop(None).unwrap(), format!("line {i}"));
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (tx, mut rx) = line_channel(LogSource::Stdout);
        tx.push("first".into());
        tx.push("second".into());

        assert_eq!(rx.peek(None).unwrap(), "first");
        assert_eq!(rx.peek(None).unwrap(), "first");
        assert_eq!(rx.len(), 2);
        assert_eq!(rx.pop(None).unwrap(), "first");
        assert_eq!(rx.pop(None).unwrap(), "second");
    }

    #[test]
    fn test_closed_after_buffered_lines() {
        let (tx, mut rx) = line_channel(LogSource::Stderr);
        tx.push("last words".into());
        drop(tx);

        assert_eq!(rx.pop(None).unwrap(), "last words");
        let err = rx.pop(None).unwrap_err();
        assert!(matches!(err, Error::StreamClosed { stream: "stderr" }));
    }

    #[test]
    fn test_failure_is_sticky() {
        let (tx, mut rx) = line_channel(LogSource::Stdout);
        tx.push("partial".into());
        tx.fail("input/output error");

        assert_eq!(rx.pop(None).unwrap(), "partial");
        for _ in 0..2 {
            match rx.pop(None).unwrap_err() {
                Error::StreamFailed { stream, reason } => {
                    assert_eq!(stream, "stdout");
                    assert_eq!(reason, "input/output error");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_deadline_expires_on_open_empty_queue() {
        let (_tx, mut rx) = line_channel(LogSource::Stdout);
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(matches!(rx.pop(Some(deadline)), Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_blocked_pop_wakes_on_push_from_other_thread() {
        let (tx, mut rx) = line_channel(LogSource::Stdout);
        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            tx.push("late".into());
        });
        assert_eq!(rx.pop(None).unwrap(), "late");
        producer.join().unwrap();
    }

    #[test]
    fn test_try_pop_and_drain_ready() {
        let (tx, mut rx) = line_channel(LogSource::Stdout);
        assert_eq!(rx.try_pop().unwrap(), None);
        tx.push("a".into());
        tx.push("b".into());
        assert_eq!(rx.drain_ready(), vec!["a".to_string(), "b".to_string()]);
        assert!(rx.is_empty());
    }
}
