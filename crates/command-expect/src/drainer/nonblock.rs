//! Non-blocking reads from a child's output pipe
//!
//! This is the only place that knows about the platform. On Unix the pipe
//! is switched to `O_NONBLOCK` and readiness is awaited with `poll(2)`.
//! Elsewhere a relay thread performs blocking reads and the drainer waits on
//! it with a timeout, which gives the same observable behaviour.

use std::io::{self, Read};
use std::time::Duration;

/// Result of one read attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chunk {
    /// `n` bytes were written to the front of the buffer
    Data(usize),
    /// Nothing available within the timeout
    Idle,
    /// The write end of the pipe is closed
    Eof,
}

#[cfg(unix)]
pub(crate) use unix::{NonBlockingReader, Pipe};

#[cfg(not(unix))]
pub(crate) use relay::{NonBlockingReader, Pipe};

#[cfg(unix)]
mod unix {
    use super::*;
    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::os::fd::{AsFd, AsRawFd};

    /// A readable pipe end this backend can drive
    pub(crate) trait Pipe: Read + AsFd + AsRawFd + Send + 'static {}

    impl<T: Read + AsFd + AsRawFd + Send + 'static> Pipe for T {}

    pub(crate) struct NonBlockingReader<R> {
        inner: R,
    }

    impl<R: Pipe> NonBlockingReader<R> {
        pub(crate) fn new(inner: R) -> io::Result<Self> {
            let fd = inner.as_raw_fd();
            let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
            let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
            fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
            Ok(Self { inner })
        }

        /// Wait up to `timeout` for data, then read what is there
        pub(crate) fn read_chunk(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> io::Result<Chunk> {
            let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
            let ready = {
                let mut fds = [PollFd::new(self.inner.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::from(millis)) {
                    Ok(n) => n > 0,
                    Err(Errno::EINTR) => false,
                    Err(e) => return Err(e.into()),
                }
            };
            if !ready {
                return Ok(Chunk::Idle);
            }
            self.read_now(buf)
        }

        /// Read whatever is buffered without waiting
        pub(crate) fn read_now(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
            loop {
                return match self.inner.read(buf) {
                    Ok(0) => Ok(Chunk::Eof),
                    Ok(n) => Ok(Chunk::Data(n)),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Chunk::Idle),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => Err(e),
                };
            }
        }
    }
}

#[cfg(not(unix))]
mod relay {
    use super::*;
    use std::marker::PhantomData;
    use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};

    /// A readable pipe end this backend can drive
    pub(crate) trait Pipe: Read + Send + 'static {}

    impl<T: Read + Send + 'static> Pipe for T {}

    pub(crate) struct NonBlockingReader<R> {
        rx: Receiver<io::Result<Vec<u8>>>,
        pending: Vec<u8>,
        eof: bool,
        _pipe: PhantomData<R>,
    }

    impl<R: Pipe> NonBlockingReader<R> {
        pub(crate) fn new(mut inner: R) -> io::Result<Self> {
            let (tx, rx) = mpsc::channel();
            std::thread::Builder::new()
                .name("pipe-relay".into())
                .spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        let msg = match inner.read(&mut buf) {
                            Ok(n) => Ok(buf[..n].to_vec()),
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(e) => Err(e),
                        };
                        let last = !matches!(&msg, Ok(data) if !data.is_empty());
                        if tx.send(msg).is_err() || last {
                            break;
                        }
                    }
                })?;
            Ok(Self {
                rx,
                pending: Vec::new(),
                eof: false,
                _pipe: PhantomData,
            })
        }

        pub(crate) fn read_chunk(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> io::Result<Chunk> {
            if let Some(chunk) = self.take_pending(buf) {
                return Ok(chunk);
            }
            match self.rx.recv_timeout(timeout) {
                Ok(msg) => self.accept(msg, buf),
                Err(RecvTimeoutError::Timeout) => Ok(Chunk::Idle),
                Err(RecvTimeoutError::Disconnected) => Ok(Chunk::Eof),
            }
        }

        pub(crate) fn read_now(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
            if let Some(chunk) = self.take_pending(buf) {
                return Ok(chunk);
            }
            match self.rx.try_recv() {
                Ok(msg) => self.accept(msg, buf),
                Err(TryRecvError::Empty) => Ok(Chunk::Idle),
                Err(TryRecvError::Disconnected) => Ok(Chunk::Eof),
            }
        }

        fn take_pending(&mut self, buf: &mut [u8]) -> Option<Chunk> {
            if self.eof {
                return Some(Chunk::Eof);
            }
            if self.pending.is_empty() {
                return None;
            }
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Some(Chunk::Data(n))
        }

        fn accept(&mut self, msg: io::Result<Vec<u8>>, buf: &mut [u8]) -> io::Result<Chunk> {
            let data = msg?;
            if data.is_empty() {
                self.eof = true;
                return Ok(Chunk::Eof);
            }
            self.pending = data;
            Ok(self.take_pending(buf).unwrap_or(Chunk::Idle))
        }
    }
}
