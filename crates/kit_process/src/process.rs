//! Spawn engine and lifecycle controller.

use std::ffi::{OsStr, OsString};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ProcessError, Result};
use crate::options::SpawnOptions;
use crate::sys::{self, PipeEnd, ProcessHandle, Termination};

/// Where a child is in its lifecycle. Release is expressed by consuming the
/// [`Process`] through [`Process::wait`] or [`Process::detach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Terminated with this exit code (`128 + N` for signal `N`)
    Exited(i32),
}

/// Point-in-time view of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub pid: u32,
    pub running: bool,
    pub exit_code: Option<i32>,
}

/// A spawned child process and the parent ends of its pipes, if any.
///
/// A `Process` exclusively owns its OS handle and pipe ends. Dropping it
/// without calling [`wait`](Process::wait) has the same effect as
/// [`detach`](Process::detach).
pub struct Process {
    handle: ProcessHandle,
    pub(crate) stdin: Option<PipeEnd>,
    pub(crate) stdout: Option<PipeEnd>,
    pub(crate) stderr: Option<PipeEnd>,
    state: ProcessState,
}

impl Process {
    /// Spawn `path` with `args`, applying the redirections, working directory
    /// and environment in `options`. The returned process has no pipe ends.
    ///
    /// A program that cannot be executed is reported on POSIX as exit code
    /// 127 from [`wait`](Process::wait), not as a spawn error.
    pub fn spawn<P, I, S>(path: P, args: I, options: &SpawnOptions) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self::create(path.as_ref(), collect_args(args), options, false)
    }

    /// Spawn `path` with all three standard streams connected to pipes held
    /// by the returned process. Pipe ends are non-blocking. Redirection paths
    /// in `options` are ignored; the working directory and environment
    /// apply.
    pub fn spawn_piped<P, I, S>(path: P, args: I, options: &SpawnOptions) -> Result<Self>
    where
        P: AsRef<OsStr>,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self::create(path.as_ref(), collect_args(args), options, true)
    }

    fn create(
        path: &OsStr,
        args: Vec<OsString>,
        options: &SpawnOptions,
        piped: bool,
    ) -> Result<Self> {
        if path.is_empty() {
            return Err(ProcessError::invalid_argument("empty program path"));
        }
        debug!(
            program = %path.to_string_lossy(),
            args = ?args,
            cwd = ?options.working_dir,
            piped,
            "process.spawn"
        );
        if piped && options.has_redirections() {
            debug!("process.spawn: redirection paths ignored for piped spawn");
        }

        let (handle, pipes) = sys::spawn(path, &args, options, piped)?;
        let (stdin, stdout, stderr) = match pipes {
            Some(p) => (Some(p.stdin), Some(p.stdout), Some(p.stderr)),
            None => (None, None, None),
        };

        debug!(pid = handle.id(), "process.spawn complete");
        Ok(Self {
            handle,
            stdin,
            stdout,
            stderr,
            state: ProcessState::Running,
        })
    }

    /// OS process id.
    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// `false` once termination has been observed by `is_running`.
    pub fn running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// The recorded exit code, once termination has been observed.
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            ProcessState::Running => None,
            ProcessState::Exited(code) => Some(code),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        ProcessStatus {
            pid: self.id(),
            running: self.running(),
            exit_code: self.exit_code(),
        }
    }

    pub fn has_stdin(&self) -> bool {
        self.stdin.is_some()
    }

    pub fn has_stdout(&self) -> bool {
        self.stdout.is_some()
    }

    pub fn has_stderr(&self) -> bool {
        self.stderr.is_some()
    }

    /// Block until the child terminates and return its exit code, then
    /// release the pipes and the OS handle.
    ///
    /// If [`is_running`](Process::is_running) already observed the exit, the
    /// recorded code is returned without waiting again.
    pub fn wait(mut self) -> Result<i32> {
        debug!(pid = self.id(), "process.wait");
        let code = match self.state {
            ProcessState::Exited(code) => {
                info!("[CMD] Process exited with exit code {}", code);
                code
            }
            ProcessState::Running => {
                let termination = sys::wait(&self.handle)?;
                log_termination(termination);
                termination.code()
            }
        };
        self.state = ProcessState::Exited(code);

        // pipes first, then the handle
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        debug!(pid = self.id(), exit_code = code, "process.wait complete");
        Ok(code)
    }

    /// Check without blocking whether the child is still running. On exit the
    /// code is recorded and `false` is returned; pipes and the handle stay
    /// open so buffered output can still be drained.
    pub fn is_running(&mut self) -> Result<bool> {
        if !self.running() {
            return Ok(false);
        }
        match sys::try_wait(&self.handle)? {
            None => Ok(true),
            Some(termination) => {
                log_termination(termination);
                self.state = ProcessState::Exited(termination.code());
                Ok(false)
            }
        }
    }

    /// Request termination. On POSIX `value` is a signal number (`0` only
    /// checks that the process exists); on Windows the process is terminated
    /// with `value` as its exit code. A process already observed as exited
    /// is left alone.
    pub fn kill(&mut self, value: i32) -> Result<()> {
        debug!(pid = self.id(), value, "process.kill");
        if !self.running() {
            debug!(pid = self.id(), "process.kill: already exited");
            return Ok(());
        }
        sys::kill(&self.handle, value)
    }

    /// Release the handle and pipes without waiting. The child keeps
    /// running; on POSIX it stays a zombie until this process exits.
    pub fn detach(self) {
        debug!(pid = self.id(), "process.detach");
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.id())
            .field("state", &self.state)
            .field("stdin", &self.has_stdin())
            .field("stdout", &self.has_stdout())
            .field("stderr", &self.has_stderr())
            .finish()
    }
}

fn collect_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().map(|a| a.as_ref().to_os_string()).collect()
}

fn log_termination(termination: Termination) {
    match termination {
        Termination::Exited(code) => info!("[CMD] Process exited with exit code {}", code),
        Termination::Signaled(signal) => info!("[CMD] Process exited with signal {}", signal),
    }
}
