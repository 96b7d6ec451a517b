use std::io;

/// Result alias for process and pipe operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors surfaced by pipes, child handles and the command wrappers.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The reading end of the pipe was closed by the peer. The pipe has
    /// already closed itself when this is returned.
    #[error("broken pipe: peer closed the read end")]
    BrokenPipe,
    /// A write was attempted on a pipe that is already closed.
    #[error("pipe is closed")]
    PipeClosed,
    /// The child process could not be created.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// The child ran to completion but returned a non-zero code.
    #[error("command `{command}` returned non-zero exit status {code}")]
    NonZeroExit {
        code: i32,
        command: String,
        /// Standard output captured before the failure, when it was captured.
        output: Option<Vec<u8>>,
    },
    /// The caller asked for something the handle cannot do.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Any other OS-level failure, propagated unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    /// Returns the OS error code attached to this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ProcessError::BrokenPipe => Some(libc::EPIPE),
            ProcessError::Spawn { source, .. } => source.raw_os_error(),
            ProcessError::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }

    /// Exit code carried by a [`ProcessError::NonZeroExit`].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Captured standard output carried by a [`ProcessError::NonZeroExit`].
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            ProcessError::NonZeroExit {
                output: Some(output),
                ..
            } => Some(output),
            _ => None,
        }
    }
}
