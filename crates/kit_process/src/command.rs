//! Command facade: an argument list that can be run to completion.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::options::{EnvEntry, SpawnOptions};
use crate::process::Process;

/// Options for [`Command::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Clear the command's arguments after running, whatever the outcome
    pub reset: bool,
    pub working_dir: Option<PathBuf>,
    pub env: Option<Vec<EnvEntry>>,
    pub stdin_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset: true,
            working_dir: None,
            env: None,
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push(EnvEntry::new(key, value));
        self
    }

    pub fn stdin(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stdout(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn stderr(mut self, path: impl AsRef<Path>) -> Self {
        self.stderr_path = Some(path.as_ref().to_path_buf());
        self
    }

    fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            stdin_path: self.stdin_path.clone(),
            stdout_path: self.stdout_path.clone(),
            stderr_path: self.stderr_path.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        }
    }
}

/// Ordered argument list; the first element is the program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    args: Vec<OsString>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        args.into_iter().collect()
    }

    pub fn append(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn program(&self) -> Option<&OsStr> {
        self.args.first().map(OsString::as_os_str)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn clear(&mut self) {
        self.args.clear();
    }

    /// Spawn the command with `options`, wait for it and return its exit
    /// code. An empty command returns `Ok(0)` without creating a process.
    ///
    /// With `options.reset` the argument list is cleared afterwards, on
    /// failure as well as success.
    pub fn run(&mut self, options: &RunOptions) -> Result<i32> {
        let Some((program, args)) = self.args.split_first() else {
            return Ok(0);
        };
        info!("[CMD] {}", self);

        let result = Process::spawn(program, args, &options.spawn_options())
            .and_then(Process::wait);
        if options.reset {
            self.clear();
        }
        result
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

impl<S: AsRef<OsStr>> FromIterator<S> for Command {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(|a| a.as_ref().to_os_string()).collect(),
        }
    }
}

impl<S: AsRef<OsStr>> Extend<S> for Command {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.args
            .extend(iter.into_iter().map(|a| a.as_ref().to_os_string()));
    }
}
