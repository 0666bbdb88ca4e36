//! Windows implementation: CreateProcessW, named pipes with overlapped
//! parent ends, WaitForSingleObject and TerminateProcess.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;
use windows_sys::Win32::Foundation::{
    SetHandleInformation, ERROR_BROKEN_PIPE, ERROR_IO_INCOMPLETE, ERROR_IO_PENDING,
    ERROR_NO_DATA, GENERIC_READ, GENERIC_WRITE, HANDLE, HANDLE_FLAG_INHERIT,
    INVALID_HANDLE_VALUE, STILL_ACTIVE, WAIT_OBJECT_0,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_FLAG_FIRST_PIPE_INSTANCE, FILE_FLAG_OVERLAPPED,
    OPEN_EXISTING, PIPE_ACCESS_INBOUND, PIPE_ACCESS_OUTBOUND,
};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Pipes::{
    CreateNamedPipeW, PeekNamedPipe, PIPE_READMODE_BYTE, PIPE_REJECT_REMOTE_CLIENTS,
    PIPE_TYPE_BYTE, PIPE_WAIT,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, CreateProcessW, GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
    CREATE_UNICODE_ENVIRONMENT, INFINITE, PROCESS_INFORMATION, STARTF_USESTDHANDLES,
    STARTUPINFOW,
};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use super::{ChildPipes, Termination};
use crate::error::{ProcessError, Result};
use crate::marshal;
use crate::options::SpawnOptions;
use crate::poll::PollResult;
use crate::redirect::Redirections;

const PIPE_BUFFER_SIZE: u32 = 64 * 1024;
const POLL_SLICE: Duration = Duration::from_millis(10);

static PIPE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Process handle plus the pid reported by `CreateProcessW`.
#[derive(Debug)]
pub(crate) struct ProcessHandle {
    process: OwnedHandle,
    pid: u32,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        self.pid
    }

    fn raw(&self) -> HANDLE {
        self.process.as_raw_handle() as HANDLE
    }
}

/// Manual-reset event used to complete one overlapped operation.
#[derive(Debug)]
struct Event(OwnedHandle);

impl Event {
    fn new() -> io::Result<Self> {
        // SAFETY: no name and no security attributes.
        let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: CreateEventW returned a fresh handle we now own.
        Ok(Self(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) }))
    }

    fn overlapped(&self) -> OVERLAPPED {
        // SAFETY: OVERLAPPED is plain data; all-zero is its initial state.
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = self.0.as_raw_handle() as HANDLE;
        overlapped
    }
}

/// A write the kernel has not finished. Boxed so the OVERLAPPED and the
/// buffer keep their addresses until completion.
struct PendingWrite {
    overlapped: OVERLAPPED,
    _event: Event,
    data: Vec<u8>,
}

/// Parent-held server end of a named pipe, opened for overlapped I/O.
pub(crate) struct PipeEnd {
    handle: OwnedHandle,
    pending: Option<Box<PendingWrite>>,
}

// SAFETY: the raw pointers inside a pending OVERLAPPED refer to memory owned
// by this value and are only touched through `&mut self`.
unsafe impl Send for PipeEnd {}

impl std::fmt::Debug for PipeEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEnd")
            .field("handle", &self.handle)
            .field("pending_write", &self.pending.is_some())
            .finish()
    }
}

impl PipeEnd {
    fn raw(&self) -> HANDLE {
        self.handle.as_raw_handle() as HANDLE
    }

    /// Bytes buffered in the pipe. `None` once the writer is gone.
    fn peek(&self) -> io::Result<Option<u32>> {
        let mut avail: u32 = 0;
        // SAFETY: only the total-available count is requested.
        let ok = unsafe {
            PeekNamedPipe(
                self.raw(),
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                &mut avail,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
                return Ok(None);
            }
            return Err(err);
        }
        Ok(Some(avail))
    }

    pub fn available(&self) -> Option<u64> {
        self.peek().ok().flatten().map(u64::from)
    }

    /// Read only what is already buffered so the call never blocks.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let avail = match self.peek()? {
            Some(n) if n > 0 => n,
            _ => return Ok(0),
        };
        let len = buf.len().min(avail as usize).min(u32::MAX as usize) as u32;

        let event = Event::new()?;
        let mut overlapped = event.overlapped();
        let mut read: u32 = 0;
        // SAFETY: `buf` and `overlapped` outlive the operation, which is
        // completed below before either goes out of scope.
        let ok = unsafe {
            ReadFile(
                self.raw(),
                buf.as_mut_ptr(),
                len,
                &mut read,
                &mut overlapped,
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == ERROR_IO_PENDING as i32 => {}
                Some(code) if code == ERROR_BROKEN_PIPE as i32 => return Ok(0),
                _ => return Err(err),
            }
        }
        // SAFETY: waits for the operation started above.
        let ok = unsafe { GetOverlappedResult(self.raw(), &overlapped, &mut read, 1) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(read as usize)
    }

    /// `Ok(false)` while an earlier write is still in flight; an error if
    /// that earlier write failed.
    fn finish_pending(&mut self) -> io::Result<bool> {
        let Some(pending) = self.pending.as_ref() else {
            return Ok(true);
        };
        let mut written: u32 = 0;
        // SAFETY: the OVERLAPPED belongs to the operation being checked.
        let ok =
            unsafe { GetOverlappedResult(self.raw(), &pending.overlapped, &mut written, 0) };
        if ok == 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_IO_INCOMPLETE as i32) {
                return Ok(false);
            }
            self.pending = None;
            return Err(err);
        }
        self.pending = None;
        Ok(true)
    }

    /// Start a write. Data the kernel did not finish immediately is kept in
    /// a private buffer and counted as accepted.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.finish_pending()? {
            return Ok(0);
        }
        let len = data.len().min(u32::MAX as usize);
        let event = Event::new()?;
        let mut pending = Box::new(PendingWrite {
            overlapped: event.overlapped(),
            data: data[..len].to_vec(),
            _event: event,
        });

        let mut written: u32 = 0;
        // SAFETY: buffer and OVERLAPPED live in the box, which is either
        // stored until completion or dropped after the call finished.
        let ok = unsafe {
            WriteFile(
                self.raw(),
                pending.data.as_ptr(),
                len as u32,
                &mut written,
                &mut pending.overlapped,
            )
        };
        if ok != 0 {
            return Ok(written as usize);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_IO_PENDING as i32 => {
                self.pending = Some(pending);
                Ok(len)
            }
            Some(code) if code == ERROR_NO_DATA as i32 => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, err))
            }
            _ => Err(err),
        }
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            let mut written: u32 = 0;
            // SAFETY: cancel then wait so the kernel is done with the box
            // before it is freed.
            unsafe {
                CancelIoEx(self.raw(), &pending.overlapped);
                GetOverlappedResult(self.raw(), &pending.overlapped, &mut written, 1);
            }
        }
    }
}

fn inheritable() -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: 1,
    }
}

/// Create one named pipe. Returns (parent end, child end); `child_reads`
/// says which direction data flows.
fn named_pipe(stream: &str, child_reads: bool) -> Result<(PipeEnd, OwnedHandle)> {
    let name = format!(
        r"\\.\pipe\kit-{}-{}",
        std::process::id(),
        PIPE_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let wide = marshal::to_wide(OsStr::new(&name))?;
    let fail = |what: &str| {
        ProcessError::pipe_create_failed(format!(
            "{stream} {what} {name}: {}",
            io::Error::last_os_error()
        ))
    };

    let access = if child_reads {
        PIPE_ACCESS_OUTBOUND
    } else {
        PIPE_ACCESS_INBOUND
    };
    // SAFETY: `wide` is NUL-terminated; default security, not inheritable.
    let server = unsafe {
        CreateNamedPipeW(
            wide.as_ptr(),
            access | FILE_FLAG_OVERLAPPED | FILE_FLAG_FIRST_PIPE_INSTANCE,
            PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
            1,
            PIPE_BUFFER_SIZE,
            PIPE_BUFFER_SIZE,
            0,
            ptr::null(),
        )
    };
    if server == INVALID_HANDLE_VALUE {
        return Err(fail("create"));
    }
    // SAFETY: fresh handle we own.
    let server = unsafe { OwnedHandle::from_raw_handle(server as RawHandle) };

    let sa = inheritable();
    let desired = if child_reads { GENERIC_READ } else { GENERIC_WRITE };
    // SAFETY: the client end is opened synchronously; children expect
    // ordinary blocking handles.
    let client = unsafe {
        CreateFileW(
            wide.as_ptr(),
            desired,
            0,
            &sa,
            OPEN_EXISTING,
            0,
            ptr::null_mut(),
        )
    };
    if client == INVALID_HANDLE_VALUE {
        return Err(fail("open"));
    }
    // SAFETY: fresh handle we own.
    let client = unsafe { OwnedHandle::from_raw_handle(client as RawHandle) };

    Ok((
        PipeEnd {
            handle: server,
            pending: None,
        },
        client,
    ))
}

fn create_pipes() -> Result<([Option<OwnedHandle>; 3], ChildPipes)> {
    let (stdin, stdin_child) = named_pipe("stdin", true)?;
    let (stdout, stdout_child) = named_pipe("stdout", false)?;
    let (stderr, stderr_child) = named_pipe("stderr", false)?;
    Ok((
        [Some(stdin_child), Some(stdout_child), Some(stderr_child)],
        ChildPipes {
            stdin,
            stdout,
            stderr,
        },
    ))
}

fn make_inheritable(file: File) -> Result<OwnedHandle> {
    let handle = OwnedHandle::from(file);
    // SAFETY: valid handle owned above.
    let ok = unsafe {
        SetHandleInformation(
            handle.as_raw_handle() as HANDLE,
            HANDLE_FLAG_INHERIT,
            HANDLE_FLAG_INHERIT,
        )
    };
    if ok == 0 {
        return Err(ProcessError::redirect_failed(format!(
            "inherit handle: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(handle)
}

pub(crate) fn spawn(
    program: &OsStr,
    args: &[OsString],
    options: &SpawnOptions,
    piped: bool,
) -> Result<(ProcessHandle, Option<ChildPipes>)> {
    let mut cmd = marshal::command_line(program, args)?;
    let env = options.env.as_deref().map(marshal::env_block).transpose()?;
    let cwd = options
        .working_dir
        .as_deref()
        .map(|dir| marshal::to_wide(dir.as_os_str()))
        .transpose()?;

    let (child_stdio, parent_pipes) = if piped {
        let (stdio, pipes) = create_pipes()?;
        (stdio, Some(pipes))
    } else {
        let redirections = Redirections::open(options)?;
        let stdio = [
            redirections.stdin.map(make_inheritable).transpose()?,
            redirections.stdout.map(make_inheritable).transpose()?,
            redirections.stderr.map(make_inheritable).transpose()?,
        ];
        (stdio, None)
    };

    let std_handle = |index: usize, fallback| match &child_stdio[index] {
        Some(handle) => handle.as_raw_handle() as HANDLE,
        // SAFETY: reads the parent's standard handle.
        None => unsafe { GetStdHandle(fallback) },
    };

    // SAFETY: plain data; zero is the documented initial state.
    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as u32;
    startup.dwFlags = STARTF_USESTDHANDLES;
    startup.hStdInput = std_handle(0, STD_INPUT_HANDLE);
    startup.hStdOutput = std_handle(1, STD_OUTPUT_HANDLE);
    startup.hStdError = std_handle(2, STD_ERROR_HANDLE);

    let mut flags = 0;
    if env.is_some() {
        flags |= CREATE_UNICODE_ENVIRONMENT;
    }

    // SAFETY: plain data, filled in by CreateProcessW.
    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    // SAFETY: every pointer refers to a live, NUL-terminated buffer above.
    let ok = unsafe {
        CreateProcessW(
            ptr::null(),
            cmd.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1,
            flags,
            env.as_ref()
                .map_or(ptr::null(), |block| block.as_ptr() as *const _),
            cwd.as_ref().map_or(ptr::null(), |dir| dir.as_ptr()),
            &startup,
            &mut info,
        )
    };
    // The child has its own copies of the inherited handles.
    drop(child_stdio);

    if ok == 0 {
        return Err(ProcessError::spawn_failed(format!(
            "{}: {}",
            program.to_string_lossy(),
            io::Error::last_os_error()
        )));
    }

    // SAFETY: both handles were just returned to us by CreateProcessW.
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess as RawHandle) };
    drop(unsafe { OwnedHandle::from_raw_handle(info.hThread as RawHandle) });

    debug!(pid = info.dwProcessId, piped, "process.spawn created");
    Ok((
        ProcessHandle {
            process,
            pid: info.dwProcessId,
        },
        parent_pipes,
    ))
}

fn exit_code(handle: &ProcessHandle) -> Result<u32> {
    let mut code: u32 = 0;
    // SAFETY: valid process handle.
    if unsafe { GetExitCodeProcess(handle.raw(), &mut code) } == 0 {
        return Err(ProcessError::wait_failed(format!(
            "GetExitCodeProcess({}): {}",
            handle.pid,
            io::Error::last_os_error()
        )));
    }
    Ok(code)
}

pub(crate) fn wait(handle: &ProcessHandle) -> Result<Termination> {
    // SAFETY: valid process handle.
    let ret = unsafe { WaitForSingleObject(handle.raw(), INFINITE) };
    if ret != WAIT_OBJECT_0 {
        return Err(ProcessError::wait_failed(format!(
            "WaitForSingleObject({}): {}",
            handle.pid,
            io::Error::last_os_error()
        )));
    }
    Ok(Termination::Exited(exit_code(handle)? as i32))
}

pub(crate) fn try_wait(handle: &ProcessHandle) -> Result<Option<Termination>> {
    let code = exit_code(handle)?;
    if code == STILL_ACTIVE as u32 {
        // a process may also exit with 259; confirm with a zero-timeout wait
        // SAFETY: valid process handle.
        if unsafe { WaitForSingleObject(handle.raw(), 0) } != WAIT_OBJECT_0 {
            return Ok(None);
        }
    }
    Ok(Some(Termination::Exited(code as i32)))
}

/// Terminate the child; `value` becomes its exit code.
pub(crate) fn kill(handle: &ProcessHandle, value: i32) -> Result<()> {
    // SAFETY: valid process handle.
    if unsafe { TerminateProcess(handle.raw(), value as u32) } == 0 {
        return Err(ProcessError::io(format!(
            "TerminateProcess({}): {}",
            handle.pid,
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Peek both output pipes until one has data or the timeout passes.
pub(crate) fn poll(
    stdout: Option<&PipeEnd>,
    stderr: Option<&PipeEnd>,
    timeout_ms: i32,
) -> Result<PollResult> {
    let mut result = PollResult::default();
    if stdout.is_none() && stderr.is_none() {
        return Ok(result);
    }
    let deadline = (timeout_ms >= 0)
        .then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));

    loop {
        let mut open = false;
        if let Some(end) = stdout {
            if let Some(n) = end.peek()? {
                open = true;
                if n > 0 {
                    result.stdout_ready = true;
                    result.stdout_available = Some(u64::from(n));
                }
            }
        }
        if let Some(end) = stderr {
            if let Some(n) = end.peek()? {
                open = true;
                if n > 0 {
                    result.stderr_ready = true;
                    result.stderr_available = Some(u64::from(n));
                }
            }
        }
        if result.stdout_ready || result.stderr_ready || !open {
            return Ok(result);
        }

        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(result);
                }
                (deadline - now).min(POLL_SLICE)
            }
            None => POLL_SLICE,
        };
        thread::sleep(slice);
    }
}
