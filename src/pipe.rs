//! Non-blocking pipes.
//!
//! A [`Pipe`] wraps one file descriptor switched to non-blocking mode and
//! registered with the tokio reactor. Every operation that would block the
//! thread instead suspends the calling task until the descriptor is ready, so
//! many pipes (and many children) can be driven from a single thread.
//!
//! Reads come in two flavours: bulk reads through [`Pipe::read`] and
//! line-oriented reads through [`Pipe::read_line`]. Line reads keep the bytes
//! they over-read in a reassembly buffer which later reads drain first, so the
//! two can be mixed freely without losing data.
//!
//! # Examples
//!
//! ```no_run
//! use maniac_subprocess::pipe;
//!
//! # async fn example() -> maniac_subprocess::ProcessResult<()> {
//! let (mut reader, mut writer) = pipe()?;
//!
//! writer.write(b"hello\nworld").await?;
//! writer.close();
//!
//! assert_eq!(reader.read_line(None).await?, b"hello\n");
//! assert_eq!(reader.read_to_end().await?, b"world");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use futures::stream::{self, Stream};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::process::unix::{pipe_cloexec, read_fd, set_nonblocking, write_fd};

/// Outcome of a single read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes delivered by the OS. Never empty.
    Data(Vec<u8>),
    /// The peer closed its end (or this pipe was closed); nothing more will come.
    Closed,
}

/// A non-blocking, buffered byte pipe over one file descriptor.
pub struct Pipe {
    /// `None` once closed; dropping the `AsyncFd` deregisters and closes it.
    fd: Option<AsyncFd<OwnedFd>>,
    /// Bytes read ahead by `read_line` that no caller has consumed yet.
    line_buffer: Vec<u8>,
    chunk_size: usize,
}

/// Creates an OS pipe and returns its `(reader, writer)` ends as [`Pipe`]s.
///
/// Must be called from within a tokio runtime.
pub fn pipe() -> ProcessResult<(Pipe, Pipe)> {
    let (read, write) = pipe_cloexec()?;
    Ok((Pipe::new(read)?, Pipe::new(write)?))
}

impl Pipe {
    /// Takes ownership of `fd`, switches it to non-blocking mode and registers
    /// it with the current tokio reactor.
    pub fn new(fd: impl Into<OwnedFd>) -> ProcessResult<Self> {
        Self::with_config(fd, &ProcessConfig::default())
    }

    pub fn with_config(fd: impl Into<OwnedFd>, config: &ProcessConfig) -> ProcessResult<Self> {
        let fd = fd.into();
        set_nonblocking(fd.as_raw_fd())?;
        let fd = AsyncFd::new(fd)?;
        Ok(Self {
            fd: Some(fd),
            line_buffer: Vec::new(),
            chunk_size: config.normalized().read_chunk_bytes,
        })
    }

    /// Whether the descriptor has been released.
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    /// The underlying descriptor, or `None` once closed.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Bytes read from the OS but not yet returned to a caller.
    pub fn buffered(&self) -> &[u8] {
        &self.line_buffer
    }

    /// Releases the descriptor. Calling this more than once is a no-op.
    ///
    /// Bytes still sitting in the reassembly buffer stay readable.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            trace!(fd = fd.as_raw_fd(), "closing pipe");
            drop(fd);
        }
    }

    /// Writes all of `data`, suspending while the descriptor is full.
    ///
    /// Fails with [`ProcessError::BrokenPipe`] once the reader has gone away;
    /// the pipe is closed before the error is returned.
    pub async fn write(&mut self, data: &[u8]) -> ProcessResult<()> {
        if self.is_closed() {
            return Err(ProcessError::PipeClosed);
        }

        let mut remaining = data;
        while !remaining.is_empty() {
            let Some(fd) = self.fd.as_ref() else {
                return Err(ProcessError::PipeClosed);
            };
            let mut guard = fd.writable().await?;
            let attempt = guard.try_io(|inner| write_fd(inner.as_raw_fd(), remaining));
            drop(guard);

            match attempt {
                Ok(Ok(written)) => remaining = &remaining[written..],
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Ok(Err(err)) if err.raw_os_error() == Some(libc::EPIPE) => {
                    debug!(
                        unwritten = remaining.len(),
                        "peer closed pipe during write"
                    );
                    self.close();
                    return Err(ProcessError::BrokenPipe);
                }
                Ok(Err(err)) => return Err(err.into()),
                // Readiness was stale; wait for the next edge.
                Err(_would_block) => {}
            }
        }
        Ok(())
    }

    /// Writes every item of `lines` in order. No separators are added.
    pub async fn write_lines<I, L>(&mut self, lines: I) -> ProcessResult<()>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        for line in lines {
            self.write(line.as_ref()).await?;
        }
        Ok(())
    }

    /// Performs one read of at most `max` bytes, suspending until the
    /// descriptor is readable. Reading zero bytes closes the pipe.
    pub async fn read_chunk(&mut self, max: usize) -> ProcessResult<Chunk> {
        let mut buf = vec![0u8; max.clamp(1, self.chunk_size)];
        loop {
            let Some(fd) = self.fd.as_ref() else {
                return Ok(Chunk::Closed);
            };
            let mut guard = fd.readable().await?;
            let attempt = guard.try_io(|inner| read_fd(inner.as_raw_fd(), &mut buf));
            drop(guard);

            match attempt {
                Ok(Ok(0)) => {
                    trace!("peer closed pipe");
                    self.close();
                    return Ok(Chunk::Closed);
                }
                Ok(Ok(read)) => {
                    buf.truncate(read);
                    return Ok(Chunk::Data(buf));
                }
                Ok(Err(err)) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => {}
            }
        }
    }

    /// Reads from the pipe.
    ///
    /// With `size == Some(n)` up to `n` bytes are returned, fewer only when the
    /// peer closes first. With `size == None` a greedy read accumulates until
    /// the peer closes, while a non-greedy read returns the first non-empty
    /// chunk. Buffered bytes left over by [`read_line`](Self::read_line) are
    /// always returned first.
    pub async fn read(&mut self, size: Option<usize>, greedy: bool) -> ProcessResult<Vec<u8>> {
        let mut data = match size {
            Some(n) => {
                let take = n.min(self.line_buffer.len());
                self.line_buffer.drain(..take).collect()
            }
            None => std::mem::take(&mut self.line_buffer),
        };

        match size {
            Some(n) => {
                while data.len() < n {
                    match self.read_chunk(n - data.len()).await? {
                        Chunk::Data(bytes) => data.extend_from_slice(&bytes),
                        Chunk::Closed => break,
                    }
                }
            }
            None => {
                while greedy || data.is_empty() {
                    match self.read_chunk(self.chunk_size).await? {
                        Chunk::Data(bytes) => data.extend_from_slice(&bytes),
                        Chunk::Closed => break,
                    }
                }
            }
        }
        Ok(data)
    }

    /// Reads until the peer closes its end.
    ///
    /// Cancel safe: chunks read before the future is dropped are kept in the
    /// reassembly buffer and returned by the next read.
    pub async fn read_to_end(&mut self) -> ProcessResult<Vec<u8>> {
        loop {
            match self.read_chunk(self.chunk_size).await? {
                Chunk::Data(bytes) => self.line_buffer.extend_from_slice(&bytes),
                Chunk::Closed => return Ok(std::mem::take(&mut self.line_buffer)),
            }
        }
    }

    /// Returns the next line, including its `\n` terminator.
    ///
    /// With `max == Some(n)` at most `n` bytes are returned; when no newline
    /// shows up within the first `n` bytes, exactly `n` bytes are returned and
    /// the rest stays buffered for the next call. A trailing fragment without a
    /// newline is returned once at end of stream, after which every call
    /// returns an empty vector.
    pub async fn read_line(&mut self, max: Option<usize>) -> ProcessResult<Vec<u8>> {
        if max == Some(0) {
            return Ok(Vec::new());
        }

        let mut line_end = find_newline(&self.line_buffer, 0);
        while line_end.is_none()
            && !self.is_closed()
            && max.map_or(true, |max| self.line_buffer.len() < max)
        {
            let scanned = self.line_buffer.len();
            match self.read_chunk(self.chunk_size).await? {
                Chunk::Data(bytes) => self.line_buffer.extend_from_slice(&bytes),
                Chunk::Closed => break,
            }
            line_end = find_newline(&self.line_buffer, scanned);
        }

        let take = match (line_end, max) {
            (Some(end), Some(max)) if end < max => end + 1,
            (Some(end), None) => end + 1,
            (_, Some(max)) => max.min(self.line_buffer.len()),
            (None, None) => self.line_buffer.len(),
        };
        Ok(self.line_buffer.drain(..take).collect())
    }

    /// Reads every remaining line until end of stream.
    pub async fn read_lines(&mut self) -> ProcessResult<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line(None).await?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    /// Streams lines until end of stream.
    pub fn lines(&mut self) -> impl Stream<Item = ProcessResult<Vec<u8>>> + '_ {
        stream::try_unfold(self, |pipe| async move {
            let line = pipe.read_line(None).await?;
            let next = if line.is_empty() {
                None
            } else {
                Some((line, pipe))
            };
            Ok::<_, ProcessError>(next)
        })
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

fn find_newline(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|pos| pos + from)
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("fd", &self.as_raw_fd())
            .field("buffered", &self.line_buffer.len())
            .finish()
    }
}
