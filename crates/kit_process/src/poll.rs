//! Readiness poller for the output pipes of a [`Process`].

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::process::Process;
use crate::sys;

/// Snapshot of output readiness. `*_available` is the number of buffered
/// bytes when the OS reports it; it is `None` for a pipe that is not ready.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollResult {
    pub stdout_ready: bool,
    pub stdout_available: Option<u64>,
    pub stderr_ready: bool,
    pub stderr_available: Option<u64>,
}

impl PollResult {
    pub fn any_ready(&self) -> bool {
        self.stdout_ready || self.stderr_ready
    }
}

impl Process {
    /// Wait up to `timeout_ms` for stdout or stderr to have data. `0` returns
    /// at once; a negative timeout waits indefinitely. Polling never consumes
    /// data. A hang-up without data is not reported as ready.
    pub fn poll(&self, timeout_ms: i32) -> Result<PollResult> {
        let result = sys::poll(self.stdout.as_ref(), self.stderr.as_ref(), timeout_ms)?;
        if result.any_ready() {
            debug!(pid = self.id(), timeout_ms, ?result, "process.poll");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_result_json() {
        let result = PollResult {
            stdout_ready: true,
            stdout_available: Some(6),
            ..Default::default()
        };
        assert!(result.any_ready());
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"stdout_ready":true,"stdout_available":6,"stderr_ready":false,"stderr_available":null}"#
        );
        assert!(!PollResult::default().any_ready());
    }

    #[cfg(unix)]
    #[test]
    fn test_poll_without_pipes() {
        use crate::SpawnOptions;
        let p = Process::spawn("/bin/sh", ["-c", "exit 0"], &SpawnOptions::default()).unwrap();
        let start = std::time::Instant::now();
        assert_eq!(p.poll(-1).unwrap(), PollResult::default());
        assert!(start.elapsed() < std::time::Duration::from_millis(50));
        p.wait().unwrap();
    }
}
