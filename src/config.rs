use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default size of a single read attempt on a pipe (64 KiB).
const DEFAULT_READ_CHUNK_BYTES: usize = 64 * 1024;

/// Default first sleep of the exit polling loop.
const DEFAULT_WAIT_BACKOFF_INITIAL_MS: u64 = 10;

/// Default ceiling for the exit polling back-off.
const DEFAULT_WAIT_BACKOFF_MAX_MS: u64 = 500;

/// Tunables shared by every child spawned from a [`Command`](crate::Command).
///
/// # Example
///
/// ```rust
/// use maniac_subprocess::ProcessConfig;
///
/// let config = ProcessConfig::default()
///     .with_read_chunk_bytes(4096)
///     .with_wait_backoff(5, 100);
/// assert_eq!(config.read_chunk_bytes, 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Upper bound on the bytes requested from the OS per read attempt.
    pub read_chunk_bytes: usize,
    /// First sleep of the exit polling loop, in milliseconds.
    pub wait_backoff_initial_ms: u64,
    /// Ceiling for the doubling back-off, in milliseconds.
    pub wait_backoff_max_ms: u64,
    /// Mark every inherited descriptor above stderr close-on-exec in the child.
    pub close_fds: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            read_chunk_bytes: DEFAULT_READ_CHUNK_BYTES,
            wait_backoff_initial_ms: DEFAULT_WAIT_BACKOFF_INITIAL_MS,
            wait_backoff_max_ms: DEFAULT_WAIT_BACKOFF_MAX_MS,
            close_fds: true,
        }
    }
}

impl ProcessConfig {
    pub fn with_read_chunk_bytes(mut self, bytes: usize) -> Self {
        self.read_chunk_bytes = bytes;
        self
    }

    pub fn with_wait_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.wait_backoff_initial_ms = initial_ms;
        self.wait_backoff_max_ms = max_ms;
        self
    }

    pub fn with_close_fds(mut self, close_fds: bool) -> Self {
        self.close_fds = close_fds;
        self
    }

    /// Returns a copy with zero values replaced so every loop makes progress.
    pub fn normalized(mut self) -> Self {
        if self.read_chunk_bytes == 0 {
            self.read_chunk_bytes = DEFAULT_READ_CHUNK_BYTES;
        }
        if self.wait_backoff_initial_ms == 0 {
            self.wait_backoff_initial_ms = 1;
        }
        self.wait_backoff_max_ms = self.wait_backoff_max_ms.max(self.wait_backoff_initial_ms);
        self
    }

    pub(crate) fn wait_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.wait_backoff_initial_ms)
    }

    pub(crate) fn wait_backoff_max(&self) -> Duration {
        Duration::from_millis(self.wait_backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_repairs_zero_values() {
        let config = ProcessConfig {
            read_chunk_bytes: 0,
            wait_backoff_initial_ms: 0,
            wait_backoff_max_ms: 0,
            close_fds: false,
        }
        .normalized();
        assert_eq!(config.read_chunk_bytes, DEFAULT_READ_CHUNK_BYTES);
        assert_eq!(config.wait_backoff_initial_ms, 1);
        assert_eq!(config.wait_backoff_max_ms, 1);
        assert!(!config.close_fds);
    }

    #[test]
    fn max_backoff_never_below_initial() {
        let config = ProcessConfig::default()
            .with_wait_backoff(200, 50)
            .normalized();
        assert_eq!(config.wait_backoff_initial(), Duration::from_millis(200));
        assert_eq!(config.wait_backoff_max(), Duration::from_millis(200));
    }
}
