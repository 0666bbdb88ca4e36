//! Redirection resolver: opens the files named for a child's standard
//! streams before the child is created.

use crate::error::{ProcessError, Result};
use crate::options::SpawnOptions;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

/// Files opened for the child's stdin/stdout/stderr. `None` means the
/// stream is inherited from the parent.
#[derive(Debug, Default)]
pub(crate) struct Redirections {
    pub stdin: Option<File>,
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

impl Redirections {
    /// Open every redirection named in `options`.
    ///
    /// Files opened before a failing one are closed when this returns the
    /// error, so a partial setup never leaks a descriptor.
    pub fn open(options: &SpawnOptions) -> Result<Self> {
        let stdin = options
            .stdin_path
            .as_deref()
            .map(open_input)
            .transpose()?;
        let stdout = options
            .stdout_path
            .as_deref()
            .map(|p| open_output("stdout", p))
            .transpose()?;
        let stderr = options
            .stderr_path
            .as_deref()
            .map(|p| open_output("stderr", p))
            .transpose()?;

        Ok(Self {
            stdin,
            stdout,
            stderr,
        })
    }
}

fn open_input(path: &Path) -> Result<File> {
    debug!(path = %path.display(), "redirect stdin");
    File::open(path).map_err(|e| {
        ProcessError::redirect_failed(format!("stdin from {}: {}", path.display(), e))
    })
}

fn open_output(stream: &str, path: &Path) -> Result<File> {
    debug!(stream, path = %path.display(), "redirect output");
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o644);
    }
    opts.open(path).map_err(|e| {
        ProcessError::redirect_failed(format!("{} to {}: {}", stream, path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_no_paths_inherits() {
        let r = Redirections::open(&SpawnOptions::default()).unwrap();
        assert!(r.stdin.is_none() && r.stdout.is_none() && r.stderr.is_none());
    }

    #[test]
    fn test_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        std::fs::write(&out, "previous contents").unwrap();

        let r = Redirections::open(&SpawnOptions::new().stdout(&out)).unwrap();
        assert!(r.stdout.is_some());
        assert_eq!(std::fs::read(&out).unwrap().len(), 0);
    }

    #[test]
    fn test_streams_use_their_own_paths() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let err = dir.path().join("err.txt");

        let mut r = Redirections::open(&SpawnOptions::new().stdout(&out).stderr(&err)).unwrap();
        r.stderr.as_mut().unwrap().write_all(b"oops").unwrap();
        drop(r);

        assert_eq!(std::fs::read_to_string(&err).unwrap(), "oops");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn test_missing_stdin_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let opts = SpawnOptions::new()
            .stdout(&out)
            .stdin(dir.path().join("does-not-exist"));

        let err = Redirections::open(&opts).unwrap_err();
        assert!(matches!(err, ProcessError::RedirectFailed { .. }));
        assert!(err.to_string().contains("stdin"));
        // stdin is resolved first, so nothing else was created
        assert!(!out.exists());
    }
}
