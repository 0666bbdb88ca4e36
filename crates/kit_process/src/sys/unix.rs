//! POSIX implementation: fork/exec, pipe2, waitpid, kill and poll.

use std::ffi::{CStr, OsStr, OsString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::poll::{poll as poll_fds, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill as send_signal, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe2, ForkResult, Pid};
use tracing::debug;

use super::{ChildPipes, Termination};
use crate::error::{ProcessError, Result};
use crate::marshal::{self, CStringArray};
use crate::options::SpawnOptions;
use crate::poll::PollResult;
use crate::redirect::Redirections;

/// Reserved exit status of a child that could not exec.
pub(crate) const EXEC_FAILED: i32 = 127;

/// Lowest descriptor that is not one of the child's standard streams.
const FIRST_FREE_FD: RawFd = 3;

/// A child's pid. Reaping it is the only release a pid needs.
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    pid: Pid,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        self.pid.as_raw() as u32
    }
}

/// Parent-held end of a pipe connected to one of the child's streams.
#[derive(Debug)]
pub(crate) struct PipeEnd {
    file: File,
}

impl PipeEnd {
    fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }

    /// Read what is buffered. Would-block and end-of-stream both read 0.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write as much as the pipe accepts without blocking.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(data) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes buffered in the pipe (`FIONREAD`), if the OS reports it.
    pub fn available(&self) -> Option<u64> {
        let mut avail: libc::c_int = 0;
        // SAFETY: FIONREAD writes one c_int through the pointer.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), libc::FIONREAD, &mut avail) };
        (ret == 0).then(|| avail.max(0) as u64)
    }
}

/// Create the child described by the arguments. With `piped`, the child's
/// streams are connected to fresh pipes and the parent ends are returned;
/// otherwise the redirections in `options` apply.
pub(crate) fn spawn(
    program: &OsStr,
    args: &[OsString],
    options: &SpawnOptions,
    piped: bool,
) -> Result<(ProcessHandle, Option<ChildPipes>)> {
    // Everything the child needs is allocated here, before fork.
    let argv = marshal::argv(program, args)?;
    let envp = options.env.as_deref().map(marshal::envp).transpose()?;
    let exec_path = match envp {
        // execve does no PATH search
        Some(_) => marshal::to_cstring(resolve_program(program).as_os_str())?,
        None => marshal::to_cstring(program)?,
    };
    let cwd = options
        .working_dir
        .as_deref()
        .map(|dir| marshal::to_cstring(dir.as_os_str()))
        .transpose()?;

    let (child_stdio, parent_pipes) = if piped {
        let (stdio, pipes) = create_pipes()?;
        (stdio, Some(pipes))
    } else {
        let redirections = Redirections::open(options)?;
        let stdio = [
            redirections.stdin.map(OwnedFd::from),
            redirections.stdout.map(OwnedFd::from),
            redirections.stderr.map(OwnedFd::from),
        ];
        (stdio, None)
    };
    // A parent started with a standard stream closed can hand out fds 0-2
    // here; one of them may be a dup2 target for another stream.
    let child_stdio = child_stdio
        .map(|fd| fd.map(|fd| lift_fd(fd, FIRST_FREE_FD)).transpose())
        .into_iter()
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| ProcessError::spawn_failed(format!("move child stdio: {e}")))?;

    let raw_stdio: [Option<RawFd>; 3] = [
        child_stdio[0].as_ref().map(AsRawFd::as_raw_fd),
        child_stdio[1].as_ref().map(AsRawFd::as_raw_fd),
        child_stdio[2].as_ref().map(AsRawFd::as_raw_fd),
    ];

    // SAFETY: the child branch only calls async-signal-safe functions on
    // memory prepared above and never returns.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => unsafe {
            exec_child(&raw_stdio, cwd.as_deref(), &exec_path, &argv, envp.as_ref())
        },
        Ok(ForkResult::Parent { child }) => {
            // The child holds its own copies now.
            drop(child_stdio);
            debug!(pid = child.as_raw(), piped, "process.spawn forked");
            Ok((ProcessHandle { pid: child }, parent_pipes))
        }
        Err(e) => Err(ProcessError::spawn_failed(format!(
            "fork for {}: {}",
            program.to_string_lossy(),
            e
        ))),
    }
}

/// Return `fd`, or a close-on-exec duplicate numbered `floor` or higher if
/// it sits below `floor`.
fn lift_fd(fd: OwnedFd, floor: RawFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() >= floor {
        return Ok(fd);
    }
    let raw = fcntl(fd.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(floor))?;
    // SAFETY: F_DUPFD_CLOEXEC returned a new descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Create the stdin/stdout/stderr pipes. Returns the child ends (in stream
/// order) and the non-blocking parent ends. On failure every descriptor
/// created so far is closed by drop.
fn create_pipes() -> Result<([Option<OwnedFd>; 3], ChildPipes)> {
    let make = |stream: &str| {
        pipe2(OFlag::O_CLOEXEC)
            .map_err(|e| ProcessError::pipe_create_failed(format!("{stream} pipe: {e}")))
    };
    let (stdin_read, stdin_write) = make("stdin")?;
    let (stdout_read, stdout_write) = make("stdout")?;
    let (stderr_read, stderr_write) = make("stderr")?;

    let pipes = ChildPipes {
        stdin: PipeEnd::new(stdin_write),
        stdout: PipeEnd::new(stdout_read),
        stderr: PipeEnd::new(stderr_read),
    };
    // The parent ends are separate open file descriptions from the child
    // ends, so O_NONBLOCK here never reaches the child.
    for end in [&pipes.stdin, &pipes.stdout, &pipes.stderr] {
        end.set_nonblocking().map_err(|e| {
            ProcessError::pipe_create_failed(format!("set O_NONBLOCK: {e}"))
        })?;
    }

    Ok(([Some(stdin_read), Some(stdout_write), Some(stderr_write)], pipes))
}

/// Child side of the fork: wire stdio, change directory, exec. Exits with
/// [`EXEC_FAILED`] on any failure.
unsafe fn exec_child(
    stdio: &[Option<RawFd>; 3],
    cwd: Option<&CStr>,
    program: &CStr,
    argv: &CStringArray,
    envp: Option<&CStringArray>,
) -> ! {
    // Only async-signal-safe calls from here on.

    // The parent's ignored SIGPIPE and blocked mask would survive exec.
    let mut empty: libc::sigset_t = std::mem::zeroed();
    if libc::sigemptyset(&mut empty) != 0
        || libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut()) != 0
        || libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR
    {
        libc::_exit(EXEC_FAILED);
    }

    // Every source is above the standard descriptors, so no dup2 clobbers
    // a source still to be wired.
    for (target, source) in stdio.iter().enumerate() {
        let Some(fd) = *source else { continue };
        if libc::dup2(fd, target as RawFd) < 0 {
            libc::_exit(EXEC_FAILED);
        }
    }

    if let Some(dir) = cwd {
        if libc::chdir(dir.as_ptr()) != 0 {
            libc::_exit(EXEC_FAILED);
        }
    }

    match envp {
        Some(envp) => {
            libc::execve(program.as_ptr(), argv.as_ptr(), envp.as_ptr());
        }
        None => {
            libc::execvp(program.as_ptr(), argv.as_ptr());
        }
    }
    libc::_exit(EXEC_FAILED)
}

/// With an explicit environment the child is started by `execve`, which
/// does not search `PATH`; bare names are looked up here instead.
fn resolve_program(program: &OsStr) -> PathBuf {
    if program.as_bytes().contains(&b'/') {
        return PathBuf::from(program);
    }
    which::which(program).unwrap_or_else(|_| PathBuf::from(program))
}

fn decode(status: WaitStatus) -> Option<Termination> {
    match status {
        WaitStatus::Exited(_, code) => Some(Termination::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(Termination::Signaled(signal as i32)),
        _ => None,
    }
}

/// Block until the child terminates.
pub(crate) fn wait(handle: &ProcessHandle) -> Result<Termination> {
    loop {
        match waitpid(handle.pid, None) {
            Ok(status) => {
                if let Some(termination) = decode(status) {
                    return Ok(termination);
                }
                // stopped/continued: keep waiting for termination
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(ProcessError::wait_failed(format!(
                    "waitpid({}): {}",
                    handle.pid, e
                )))
            }
        }
    }
}

/// Non-blocking check. Reaps the child if it has terminated.
pub(crate) fn try_wait(handle: &ProcessHandle) -> Result<Option<Termination>> {
    loop {
        match waitpid(handle.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => return Ok(decode(status)),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(ProcessError::wait_failed(format!(
                    "waitpid({}, WNOHANG): {}",
                    handle.pid, e
                )))
            }
        }
    }
}

/// Send signal `value` to the child. `0` only checks that it exists.
pub(crate) fn kill(handle: &ProcessHandle, value: i32) -> Result<()> {
    let signal = match value {
        0 => None,
        n => Some(
            Signal::try_from(n)
                .map_err(|_| ProcessError::invalid_argument(format!("unknown signal: {n}")))?,
        ),
    };
    send_signal(handle.pid, signal)
        .map_err(|e| ProcessError::io(format!("kill({}, {}): {}", handle.pid, value, e)))
}

/// One `poll(2)` over the open output pipes.
pub(crate) fn poll(
    stdout: Option<&PipeEnd>,
    stderr: Option<&PipeEnd>,
    timeout_ms: i32,
) -> Result<PollResult> {
    let mut result = PollResult::default();
    if stdout.is_none() && stderr.is_none() {
        return Ok(result);
    }

    let timeout = if timeout_ms < 0 {
        PollTimeout::NONE
    } else {
        PollTimeout::try_from(timeout_ms)
            .map_err(|_| ProcessError::invalid_argument(format!("timeout {timeout_ms}ms")))?
    };

    let ends = [stdout, stderr];
    let mut fds: Vec<PollFd> = ends
        .iter()
        .flatten()
        .map(|end| PollFd::new(end.file.as_fd(), PollFlags::POLLIN))
        .collect();

    loop {
        match poll_fds(&mut fds, timeout) {
            Ok(_) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ProcessError::io(format!("poll: {e}"))),
        }
    }

    let readable: Vec<bool> = fds
        .iter()
        .map(|fd| {
            fd.revents()
                .is_some_and(|revents| revents.contains(PollFlags::POLLIN))
        })
        .collect();

    // Some systems flag POLLIN at end-of-stream; an empty pipe is a hang-up.
    let check = |end: &PipeEnd, readable: bool| -> (bool, Option<u64>) {
        if !readable {
            return (false, None);
        }
        match end.available() {
            Some(0) => (false, None),
            available => (true, available),
        }
    };

    let mut slot = 0;
    if let Some(end) = stdout {
        (result.stdout_ready, result.stdout_available) = check(end, readable[slot]);
        slot += 1;
    }
    if let Some(end) = stderr {
        (result.stderr_ready, result.stderr_available) = check(end, readable[slot]);
    }
    Ok(result)
}
