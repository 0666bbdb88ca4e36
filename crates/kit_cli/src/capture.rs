//! `kit capture`: run a piped child, feed it input and drain its output.

use anyhow::{Context, Result};
use kit_process::{Process, SpawnOptions};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Signal (POSIX) or exit code (Windows) used when the timeout expires.
#[cfg(unix)]
pub const TIMEOUT_KILL: i32 = 9;
#[cfg(windows)]
pub const TIMEOUT_KILL: i32 = 1;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub poll_interval_ms: u32,
    pub timeout: Option<Duration>,
}

/// Everything a captured child produced.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    pub pid: u32,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// JSON form of [`CaptureOutput`], with output decoded lossily.
#[derive(Debug, Serialize)]
pub struct CaptureReport {
    pub pid: u32,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CaptureOutput {
    pub fn report(&self) -> CaptureReport {
        CaptureReport {
            pid: self.pid,
            exit_code: self.exit_code,
            timed_out: self.timed_out,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// Spawn `program` with piped streams, write `input` then close stdin, and
/// collect stdout/stderr until the child exits and both pipes are drained.
pub fn capture(
    program: &[String],
    options: &SpawnOptions,
    input: Option<&[u8]>,
    settings: CaptureSettings,
) -> Result<CaptureOutput> {
    let (path, args) = program.split_first().context("No program to capture")?;
    let mut child = Process::spawn_piped(path, args, options)
        .with_context(|| format!("Failed to spawn {}", path))?;

    let mut output = CaptureOutput {
        pid: child.id(),
        ..Default::default()
    };
    let mut pending = input.unwrap_or_default();
    if pending.is_empty() {
        child.close_stdin()?;
    }

    let started = Instant::now();
    let poll_ms = i32::try_from(settings.poll_interval_ms).unwrap_or(i32::MAX);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        if !pending.is_empty() {
            match child.write_stdin(pending) {
                Ok(n) => pending = &pending[n..],
                Err(e) => {
                    // the child stopped reading; drop the rest
                    debug!(error = %e, "capture: stdin closed early");
                    pending = &[];
                }
            }
            if pending.is_empty() {
                child.close_stdin()?;
            }
        }

        let running = child.is_running()?;
        let ready = child.poll(poll_ms)?;
        if ready.stdout_ready {
            let n = child.read_stdout(&mut buf)?;
            output.stdout.extend_from_slice(&buf[..n]);
        }
        if ready.stderr_ready {
            let n = child.read_stderr(&mut buf)?;
            output.stderr.extend_from_slice(&buf[..n]);
        }
        if !running && !ready.any_ready() {
            break;
        }

        if running && !output.timed_out {
            if let Some(limit) = settings.timeout {
                if started.elapsed() >= limit {
                    warn!(pid = output.pid, ?limit, "capture: timeout, killing child");
                    child.kill(TIMEOUT_KILL)?;
                    output.timed_out = true;
                }
            }
        }
    }

    output.exit_code = child.wait()?;
    Ok(output)
}
