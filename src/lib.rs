//! Non-blocking child processes for tokio.
//!
//! Every pipe connected to a child is switched to non-blocking mode and
//! driven by the tokio reactor, so waiting on a child or shuttling its data
//! suspends only the calling task. [`Child::communicate`] feeds stdin and
//! drains stdout and stderr concurrently and never deadlocks on a full pipe.
//!
//! Only Unix-like systems are supported.

pub mod config;
pub mod error;
pub mod pipe;
pub mod process;

pub use config::ProcessConfig;
pub use error::{ProcessError, ProcessResult};
pub use pipe::{pipe, Chunk, Pipe};
pub use process::{Child, Command, ExitStatus, OrphanQueue, Output, Redirect, Reaper};
