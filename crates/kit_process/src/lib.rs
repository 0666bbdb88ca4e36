//! Process execution and pipe I/O.
//!
//! Spawns child processes with their standard streams inherited, redirected
//! to files or connected to non-blocking pipes; reads and writes those pipes
//! without blocking, polls them for readiness, waits for exit and requests
//! termination. The same API covers POSIX (fork/exec, `pipe2`, `waitpid`,
//! `poll`) and Windows (`CreateProcessW`, named pipes, overlapped I/O).
//!
//! ```no_run
//! use kit_process::{Process, SpawnOptions};
//!
//! let mut child = Process::spawn_piped("sh", ["-c", "echo hello"], &SpawnOptions::new())?;
//! let mut out = Vec::new();
//! let mut buf = [0u8; 4096];
//! loop {
//!     let running = child.is_running()?;
//!     let ready = child.poll(50)?;
//!     if ready.stdout_ready {
//!         let n = child.read_stdout(&mut buf)?;
//!         out.extend_from_slice(&buf[..n]);
//!     } else if !running {
//!         break;
//!     }
//! }
//! assert_eq!(child.wait()?, 0);
//! assert_eq!(out, b"hello\n");
//! # Ok::<(), kit_process::ProcessError>(())
//! ```
//!
//! Exit codes follow the shell convention: the child's status on a normal
//! exit, `128 + N` when killed by signal `N`, and 127 when the program could
//! not be executed.

mod command;
mod error;
mod marshal;
mod options;
mod pipe;
mod poll;
mod process;
mod redirect;
mod sys;

pub use command::{Command, RunOptions};
pub use error::{ProcessError, ProcessErrorCode, Result};
pub use options::{EnvEntry, SpawnOptions};
pub use poll::PollResult;
pub use process::{Process, ProcessState, ProcessStatus};

/// Number of processors available to this process, at least 1.
pub fn nprocessors() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
