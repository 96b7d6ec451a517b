//! Orphaned child reaping.
//!
//! A [`Child`](super::Child) dropped before its exit status was collected
//! leaves a zombie behind. Rather than tracking those in process-wide state,
//! the embedding application owns an [`OrphanQueue`] and hands it to the
//! [`Command`](super::Command)s it builds. Dropped handles push their pid onto
//! the queue, and the queue is drained without blocking before every spawn
//! (or whenever the application calls [`OrphanQueue::reap_orphans`]).

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Registry of children whose handles were dropped before they were reaped.
pub trait OrphanQueue: Send + Sync {
    /// Registers a child that still needs to be reaped.
    fn push_orphan(&self, pid: u32);

    /// Reaps every registered child that has exited, without blocking.
    fn reap_orphans(&self);
}

/// The default [`OrphanQueue`]: a list of pids polled with `waitpid(WNOHANG)`.
///
/// Cloning shares the same queue.
#[derive(Clone, Default)]
pub struct Reaper {
    orphans: Arc<Mutex<Vec<u32>>>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orphans still waiting to be reaped.
    pub fn pending(&self) -> usize {
        self.orphans.lock().len()
    }
}

enum Reap {
    Exited,
    Running,
    Gone,
}

fn try_reap(pid: u32) -> io::Result<Reap> {
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        return Ok(Reap::Gone);
    };
    let mut status = 0;
    loop {
        let ret = unsafe { libc::waitpid(raw_pid, &mut status, libc::WNOHANG) };
        if ret == raw_pid {
            return Ok(Reap::Exited);
        }
        if ret == 0 {
            return Ok(Reap::Running);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => continue,
            // Reaped elsewhere, or not our child.
            Some(libc::ECHILD) => return Ok(Reap::Gone),
            _ => return Err(err),
        }
    }
}

impl OrphanQueue for Reaper {
    fn push_orphan(&self, pid: u32) {
        self.orphans.lock().push(pid);
    }

    fn reap_orphans(&self) {
        self.orphans.lock().retain(|&pid| match try_reap(pid) {
            Ok(Reap::Running) => true,
            Ok(Reap::Exited) => {
                debug!(pid, "reaped orphaned child");
                false
            }
            Ok(Reap::Gone) => false,
            Err(err) => {
                warn!(pid, error = %err, "failed to reap orphaned child");
                true
            }
        });
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("pending", &self.pending())
            .finish()
    }
}
