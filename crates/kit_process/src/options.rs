//! Spawn options: redirection targets, working directory and environment.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// One `KEY=VALUE` pair of a child environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: OsString,
    pub value: OsString,
}

impl EnvEntry {
    pub fn new(key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        Self {
            key: key.as_ref().to_os_string(),
            value: value.as_ref().to_os_string(),
        }
    }
}

/// Options for spawning a process.
///
/// Streams without a redirection path are inherited from the parent. When
/// `env` is set it becomes the child's entire environment; otherwise the
/// parent environment is inherited. `spawn_piped` ignores the redirection
/// paths because every stream is connected to a pipe.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub stdin_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub env: Option<Vec<EnvEntry>>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the child's stdin from `path` (must exist).
    pub fn stdin(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Write the child's stdout to `path` (created or truncated).
    pub fn stdout(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Write the child's stderr to `path` (created or truncated).
    pub fn stderr(mut self, path: impl AsRef<Path>) -> Self {
        self.stderr_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add one variable to the explicit environment.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push(EnvEntry::new(key, value));
        self
    }

    /// Add several variables to the explicit environment.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let env = self.env.get_or_insert_with(Vec::new);
        env.extend(vars.into_iter().map(|(k, v)| EnvEntry::new(k, v)));
        self
    }

    /// Use an explicitly empty environment.
    pub fn clear_env(mut self) -> Self {
        self.env = Some(Vec::new());
        self
    }

    pub(crate) fn has_redirections(&self) -> bool {
        self.stdin_path.is_some() || self.stdout_path.is_some() || self.stderr_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let opts = SpawnOptions::new()
            .stdout("out.txt")
            .working_dir("/tmp")
            .env("A", "1")
            .envs([("B", "2"), ("C", "3")]);

        assert_eq!(opts.stdout_path.as_deref(), Some(Path::new("out.txt")));
        assert!(opts.stdin_path.is_none());
        assert!(opts.has_redirections());
        let env = opts.env.unwrap();
        assert_eq!(env.len(), 3);
        assert_eq!(env[0], EnvEntry::new("A", "1"));
        assert_eq!(env[2].value, OsString::from("3"));
    }

    #[test]
    fn test_defaults_inherit_everything() {
        let opts = SpawnOptions::default();
        assert!(!opts.has_redirections());
        assert!(opts.env.is_none());
        assert!(opts.working_dir.is_none());

        let opts = SpawnOptions::new().clear_env();
        assert_eq!(opts.env, Some(Vec::new()));
    }
}
