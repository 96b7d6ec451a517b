//! Child process handle and exit status.

use std::fmt;
use std::os::unix::io::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus as StdExitStatus;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::config::ProcessConfig;
use crate::error::{ProcessError, ProcessResult};
use crate::pipe::Pipe;

use super::reaper::OrphanQueue;
use super::unix::send_signal;

/// How a child process ended, as reported by `waitpid`.
///
/// [`returncode`](Self::returncode) folds both outcomes into one signed
/// value: the exit code, or the negated number of the fatal signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitStatus(StdExitStatus);

impl ExitStatus {
    pub(crate) fn new(status: StdExitStatus) -> Self {
        Self(status)
    }

    #[cfg(test)]
    fn from_raw(raw: i32) -> Self {
        Self(StdExitStatus::from_raw(raw))
    }

    /// True for a zero exit code. A signalled child never succeeds.
    pub fn success(&self) -> bool {
        self.0.success()
    }

    /// The exit code, `None` for a signalled child.
    pub fn code(&self) -> Option<i32> {
        self.0.code()
    }

    /// The fatal signal, `None` for a child that exited on its own.
    pub fn signal(&self) -> Option<i32> {
        self.0.signal()
    }

    /// Exit code, or the negated signal number for signal termination.
    pub fn returncode(&self) -> i32 {
        match (self.code(), self.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => -signal,
            (None, None) => 0,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "returncode {}", self.returncode())
    }
}

/// Everything a child left behind, collected by
/// [`Command::output`](super::Command::output).
#[derive(Debug)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A handle to a spawned child process and its piped standard streams.
///
/// The exit status is observed lazily through [`poll`](Self::poll) or
/// [`wait`](Self::wait) and memoized once seen. A handle dropped before its
/// child was reaped hands the pid to the command's [`OrphanQueue`], if one was
/// configured.
///
/// # Examples
///
/// ```no_run
/// use maniac_subprocess::{Command, Redirect};
///
/// # async fn example() -> maniac_subprocess::ProcessResult<()> {
/// let mut child = Command::new("/bin/sh")
///     .stdin(Redirect::Pipe)
///     .stdout(Redirect::Pipe)
///     .spawn()?;
///
/// let (stdout, stderr) = child.communicate(Some(b"echo A\nexit\n")).await?;
/// assert_eq!(stdout.as_deref(), Some(&b"A\n"[..]));
/// assert!(stderr.is_none());
/// assert_eq!(child.returncode().map(|s| s.returncode()), Some(0));
/// # Ok(())
/// # }
/// ```
pub struct Child {
    /// The child's standard input, if piped.
    pub stdin: Option<Pipe>,
    /// The child's standard output, if piped.
    pub stdout: Option<Pipe>,
    /// The child's standard error, if piped.
    pub stderr: Option<Pipe>,
    inner: std::process::Child,
    status: Option<ExitStatus>,
    config: ProcessConfig,
    orphans: Option<Arc<dyn OrphanQueue>>,
    command: String,
}

impl Child {
    /// Wraps the parent-side descriptors of a freshly spawned child.
    ///
    /// If a descriptor cannot be registered with the reactor the child is
    /// killed and reaped before the error is returned.
    pub(crate) fn from_parts(
        mut inner: std::process::Child,
        stdin: Option<OwnedFd>,
        stdout: Option<OwnedFd>,
        stderr: Option<OwnedFd>,
        config: ProcessConfig,
        orphans: Option<Arc<dyn OrphanQueue>>,
        command: String,
    ) -> ProcessResult<Self> {
        let wrap = |fd: Option<OwnedFd>| fd.map(|fd| Pipe::with_config(fd, &config)).transpose();
        let pipes = wrap(stdin).and_then(|stdin| Ok((stdin, wrap(stdout)?, wrap(stderr)?)));
        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(err) => {
                warn!(pid = inner.id(), error = %err, "cannot register child pipes, killing child");
                if let Err(kill_err) = inner.kill().and_then(|()| inner.wait().map(drop)) {
                    warn!(pid = inner.id(), error = %kill_err, "failed to reap abandoned child");
                }
                return Err(err);
            }
        };
        Ok(Self {
            stdin,
            stdout,
            stderr,
            inner,
            status: None,
            config,
            orphans,
            command,
        })
    }

    /// Returns the OS-assigned process identifier for the child.
    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    /// The command line this child was spawned from, for diagnostics.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The last observed exit status, without asking the OS.
    pub fn returncode(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Checks whether the child has exited, without blocking.
    ///
    /// Once an exit status has been observed it is returned from then on
    /// without querying the OS again.
    pub fn poll(&mut self) -> ProcessResult<Option<ExitStatus>> {
        if self.status.is_none() {
            if let Some(status) = self.inner.try_wait()? {
                let status = ExitStatus::new(status);
                debug!(
                    pid = self.id(),
                    returncode = status.returncode(),
                    "child exited"
                );
                self.status = Some(status);
            }
        }
        Ok(self.status)
    }

    /// Suspends the calling task until the child exits.
    ///
    /// Wakes on `SIGCHLD` and, as a fallback, on a doubling back-off between
    /// polls. There is no timeout: race this against `tokio::time::timeout`
    /// when a bound is needed.
    pub async fn wait(&mut self) -> ProcessResult<ExitStatus> {
        if let Some(status) = self.poll()? {
            return Ok(status);
        }

        // Registered before the next poll so an exit in between still wakes us.
        let mut sigchld = match signal(SignalKind::child()) {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(error = %err, "SIGCHLD unavailable, falling back to polling");
                None
            }
        };

        let max = self.config.wait_backoff_max();
        let mut delay = self.config.wait_backoff_initial();
        loop {
            if let Some(status) = self.poll()? {
                return Ok(status);
            }

            let stream_closed = match sigchld.as_mut() {
                Some(stream) => tokio::select! {
                    received = stream.recv() => received.is_none(),
                    _ = sleep(delay) => false,
                },
                None => {
                    sleep(delay).await;
                    false
                }
            };
            if stream_closed {
                sigchld = None;
            }
            delay = (delay * 2).min(max);
        }
    }

    /// Sends `signal` to the child. Does nothing once the child has been reaped.
    pub fn send_signal(&mut self, signal: i32) -> ProcessResult<()> {
        if self.status.is_some() {
            return Ok(());
        }
        trace!(pid = self.id(), signal, "signalling child");
        send_signal(self.id(), signal)?;
        Ok(())
    }

    /// Asks the child to stop with `SIGTERM`.
    pub fn terminate(&mut self) -> ProcessResult<()> {
        self.send_signal(libc::SIGTERM)
    }

    /// Forces the child to stop with `SIGKILL`.
    pub fn kill(&mut self) -> ProcessResult<()> {
        self.send_signal(libc::SIGKILL)
    }

    /// Feeds `input` to the child's stdin while draining its stdout and stderr,
    /// then waits for it to exit.
    ///
    /// The three streams are driven concurrently on the calling task, so a
    /// child that fills its output pipe before reading all of its input cannot
    /// deadlock us. Outcomes are checked stdout first, then stderr, then the
    /// stdin writer. A writer that hits [`ProcessError::BrokenPipe`] because
    /// the child stopped reading is not an error.
    ///
    /// Returns the captured stdout and stderr; `None` for streams that were not
    /// piped. Passing non-empty input when stdin is not piped is rejected.
    ///
    /// # Cancel safety
    ///
    /// The pipes stay owned by this handle. If the future is dropped, output
    /// read so far stays buffered in the pipes and a later call returns it
    /// together with the rest. Input is not resumed, and once the writer has
    /// closed stdin a retry must pass no input.
    pub async fn communicate(
        &mut self,
        input: Option<&[u8]>,
    ) -> ProcessResult<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let input = input.unwrap_or_default();
        if !input.is_empty() && self.stdin.is_none() {
            return Err(ProcessError::InvalidInput(
                "input given but stdin is not piped".into(),
            ));
        }

        let Child {
            stdin,
            stdout,
            stderr,
            ..
        } = &mut *self;
        let (stdout, stderr, written) = tokio::join!(
            drain(stdout.as_mut()),
            drain(stderr.as_mut()),
            feed(stdin.as_mut(), input),
        );

        let stdout = stdout.transpose()?;
        let stderr = stderr.transpose()?;
        match written {
            Err(ProcessError::BrokenPipe) => {
                debug!(pid = self.id(), "child closed stdin before reading all input");
            }
            Err(err) => return Err(err),
            Ok(()) => {}
        }

        self.wait().await?;
        Ok((stdout, stderr))
    }
}

async fn drain(pipe: Option<&mut Pipe>) -> Option<ProcessResult<Vec<u8>>> {
    Some(pipe?.read_to_end().await)
}

/// Writes `input` then closes the pipe, whatever the write outcome.
async fn feed(pipe: Option<&mut Pipe>, input: &[u8]) -> ProcessResult<()> {
    let Some(pipe) = pipe else {
        return Ok(());
    };
    let result = if input.is_empty() {
        Ok(())
    } else {
        pipe.write(input).await
    };
    pipe.close();
    result
}

impl Drop for Child {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        if let Some(orphans) = &self.orphans {
            trace!(pid = self.id(), "handing unreaped child to orphan queue");
            orphans.push_orphan(self.id());
        }
    }
}

impl fmt::Debug for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Child")
            .field("id", &self.id())
            .field("command", &self.command)
            .field("status", &self.status)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}
