//! Configuration parsing from kit.toml

use anyhow::{Context, Result};
use kit_log::LogConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the current directory.
pub const DEFAULT_CONFIG: &str = "kit.toml";

/// Full configuration file. Every section is optional.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KitConfig {
    pub log: LogConfig,
    pub run: RunConfig,
    pub capture: CaptureConfig,
}

/// Defaults for `kit run` (and the working directory/environment of
/// `kit capture`)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub working_dir: Option<PathBuf>,
    /// Clear the command after running
    pub reset: bool,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            reset: true,
            stdin: None,
            stdout: None,
            stderr: None,
            env: BTreeMap::new(),
        }
    }
}

/// Settings for `kit capture`
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CaptureConfig {
    /// Poll timeout per drain iteration
    pub poll_interval_ms: u32,
    /// Kill the child after this long; absent means no limit
    pub timeout_ms: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            timeout_ms: None,
        }
    }
}

impl KitConfig {
    /// Parse configuration from file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Load `explicit` if given (it must exist), otherwise `kit.toml` in
    /// `dir` when present, otherwise defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let default_path = dir.join(DEFAULT_CONFIG);
        if default_path.is_file() {
            return Self::from_file(&default_path);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config: KitConfig = toml::from_str(
            r#"
            [log]
            level = "debug"
            file = "kit.log"
            ansi = false

            [run]
            working_dir = "build"
            reset = false
            stdout = "out.txt"

            [run.env]
            PATH = "/usr/bin"
            CC = "clang"

            [capture]
            poll_interval_ms = 20
            timeout_ms = 10000
            "#,
        )
        .unwrap();

        assert_eq!(config.log.filter, "debug");
        assert_eq!(config.log.file.as_deref(), Some(Path::new("kit.log")));
        assert!(!config.log.ansi);
        assert_eq!(config.run.working_dir.as_deref(), Some(Path::new("build")));
        assert!(!config.run.reset);
        assert!(config.run.stdin.is_none());
        assert_eq!(config.run.env.get("CC").map(String::as_str), Some("clang"));
        assert_eq!(config.capture.poll_interval_ms, 20);
        assert_eq!(config.capture.timeout_ms, Some(10000));
    }

    #[test]
    fn test_empty_config_defaults() {
        let config: KitConfig = toml::from_str("").unwrap();
        assert_eq!(config.log.filter, "info");
        assert!(config.run.reset);
        assert!(config.run.env.is_empty());
        assert_eq!(config.capture.poll_interval_ms, 50);
        assert!(config.capture.timeout_ms.is_none());
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = KitConfig::load(None, dir.path()).unwrap();
        assert!(config.run.reset);

        fs::write(dir.path().join(DEFAULT_CONFIG), "[run]\nreset = false\n").unwrap();
        let config = KitConfig::load(None, dir.path()).unwrap();
        assert!(!config.run.reset);

        let missing = dir.path().join("other.toml");
        let err = KitConfig::load(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "[run\n").unwrap();
        let err = KitConfig::load(Some(&bad), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
