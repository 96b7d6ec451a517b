//! Child process management on top of non-blocking pipes.
//!
//! # Overview
//!
//! The main types in this module are:
//!
//! - [`Command`]: A builder for configuring and spawning processes
//! - [`Child`]: A handle to a spawned child process and its piped streams
//! - [`ExitStatus`]: The exit status of a finished process
//! - [`Reaper`]: An [`OrphanQueue`] that collects children whose handles were dropped
//!
//! # Examples
//!
//! Run a process and check its exit code:
//!
//! ```no_run
//! use maniac_subprocess::Command;
//!
//! # async fn example() -> maniac_subprocess::ProcessResult<()> {
//! let status = Command::new("echo")
//!     .arg("Hello, world!")
//!     .status_checked()
//!     .await?;
//!
//! println!("Process exited with: {}", status);
//! # Ok(())
//! # }
//! ```
//!
//! Stream a child's output line by line:
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use maniac_subprocess::{Command, Redirect};
//!
//! # async fn example() -> maniac_subprocess::ProcessResult<()> {
//! let mut child = Command::new("ls")
//!     .arg("/")
//!     .stdout(Redirect::Pipe)
//!     .spawn()?;
//!
//! if let Some(stdout) = child.stdout.as_mut() {
//!     let mut lines = std::pin::pin!(stdout.lines());
//!     while let Some(line) = lines.try_next().await? {
//!         print!("{}", String::from_utf8_lossy(&line));
//!     }
//! }
//!
//! let status = child.wait().await?;
//! # Ok(())
//! # }
//! ```

mod child;
mod command;
mod reaper;
pub(crate) mod unix;

pub use child::{Child, ExitStatus, Output};
pub use command::{Command, Redirect};
pub use reaper::{OrphanQueue, Reaper};
