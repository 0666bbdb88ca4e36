//! Non-blocking pipe I/O on a piped [`Process`].

use tracing::debug;

use crate::error::{ProcessError, Result};
use crate::process::Process;
use crate::sys::PipeEnd;

impl Process {
    /// Write as much of `data` to the child's stdin as the pipe accepts
    /// without blocking. Returns `Ok(0)` when the pipe is full.
    pub fn write_stdin(&mut self, data: &[u8]) -> Result<usize> {
        let pid = self.id();
        let pipe = pipe_mut(&mut self.stdin, "stdin")?;
        if data.is_empty() {
            return Ok(0);
        }
        let written = pipe
            .write(data)
            .map_err(|e| ProcessError::io(format!("write stdin of {pid}: {e}")))?;
        debug!(pid, len = data.len(), written, "process.write_stdin");
        Ok(written)
    }

    /// Read whatever the child has written to stdout. Returns `Ok(0)` when
    /// nothing is buffered and at end of stream.
    pub fn read_stdout(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pid = self.id();
        read(pid, pipe_mut(&mut self.stdout, "stdout")?, buf, "stdout")
    }

    /// Read whatever the child has written to stderr. Returns `Ok(0)` when
    /// nothing is buffered and at end of stream.
    pub fn read_stderr(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pid = self.id();
        read(pid, pipe_mut(&mut self.stderr, "stderr")?, buf, "stderr")
    }

    /// Close the parent end of stdin so the child reads end-of-file.
    pub fn close_stdin(&mut self) -> Result<()> {
        match self.stdin.take() {
            Some(_) => {
                debug!(pid = self.id(), "process.close_stdin");
                Ok(())
            }
            None => Err(ProcessError::invalid_handle("stdin is not piped")),
        }
    }
}

fn pipe_mut<'a>(pipe: &'a mut Option<PipeEnd>, stream: &str) -> Result<&'a mut PipeEnd> {
    pipe.as_mut()
        .ok_or_else(|| ProcessError::invalid_handle(format!("{stream} is not piped")))
}

fn read(pid: u32, pipe: &mut PipeEnd, buf: &mut [u8], stream: &str) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let n = pipe
        .read(buf)
        .map_err(|e| ProcessError::io(format!("read {stream} of {pid}: {e}")))?;
    if n > 0 {
        debug!(pid, stream, len = n, "process.read");
    }
    Ok(n)
}
