//! Platform layer: process creation, reaping, signalling, and the
//! parent-held pipe ends.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;

/// How a child terminated, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    /// Normal exit with a status code
    Exited(i32),
    /// Killed by a signal (POSIX only)
    #[cfg_attr(windows, allow(dead_code))]
    Signaled(i32),
}

impl Termination {
    /// Exit code under the library convention: the status for a normal exit,
    /// `128 + N` for termination by signal `N`.
    pub fn code(self) -> i32 {
        match self {
            Termination::Exited(code) => code,
            Termination::Signaled(signal) => 128 + signal,
        }
    }
}

/// Parent-held ends of the three pipes created by a piped spawn.
pub(crate) struct ChildPipes {
    pub stdin: PipeEnd,
    pub stdout: PipeEnd,
    pub stderr: PipeEnd,
}
