//! Logging façade for the kit toolkit.
//!
//! Library crates only emit `tracing` events. A host calls [`init`] once to
//! install a `fmt` subscriber that writes through a single mutex-guarded
//! sink (stderr or an append-mode file), and [`shutdown`] before exit to
//! flush it.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "KIT_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Logging is already initialized")]
    AlreadyInitialized,

    #[error("Failed to open log file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Configuration
// ============================================================================

/// Subscriber configuration. Deserializes from a `[log]` table where the
/// filter may be spelled `level`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `kit_process=debug`
    #[serde(alias = "level")]
    pub filter: String,
    /// Append to this file instead of writing to stderr
    pub file: Option<PathBuf>,
    /// Colorize output (never applied to files)
    pub ansi: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            file: None,
            ansi: true,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Defaults, with the filter taken from `KIT_LOG` when it is set.
    pub fn from_env() -> Self {
        Self::default().with_env_override()
    }

    /// Replace the filter with `KIT_LOG` when it is set and non-empty.
    pub fn with_env_override(self) -> Self {
        self.with_filter_override(std::env::var(LOG_ENV).ok())
    }

    fn with_filter_override(mut self, value: Option<String>) -> Self {
        if let Some(filter) = value.filter(|v| !v.trim().is_empty()) {
            self.filter = filter;
        }
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Map a level name to a [`Level`]. Case-insensitive; `warning` is
/// accepted for `warn`.
pub fn parse_level(level: &str) -> Result<Level, LogError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(LogError::InvalidLevel(other.to_string())),
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug)]
enum Sink {
    Stderr(io::Stderr),
    File(File),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Stderr(s) => s.write(buf),
            Sink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Stderr(s) => s.flush(),
            Sink::File(f) => f.flush(),
        }
    }
}

type SharedSink = Arc<Mutex<Sink>>;

/// Hands the subscriber one locked sink per event.
struct SinkWriter(SharedSink);

struct SinkGuard<'a>(MutexGuard<'a, Sink>);

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SinkGuard(lock(&self.0))
    }
}

impl Write for SinkGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[derive(Default)]
struct LoggerState {
    sink: Option<SharedSink>,
    active: bool,
}

static STATE: Lazy<Mutex<LoggerState>> = Lazy::new(|| Mutex::new(LoggerState::default()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_sink(config: &LogConfig) -> Result<Sink, LogError> {
    match &config.file {
        None => Ok(Sink::Stderr(io::stderr())),
        Some(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(Sink::File)
            .map_err(|source| LogError::OpenFailed {
                path: path.clone(),
                source,
            }),
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Install the process-wide subscriber. Fails with
/// [`LogError::AlreadyInitialized`] on a second call or when another global
/// subscriber is already set.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let mut state = lock(&STATE);
    if state.sink.is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|_| LogError::InvalidLevel(config.filter.clone()))?;
    let sink = open_sink(config)?;
    let ansi = config.ansi && matches!(sink, Sink::Stderr(_));
    let sink: SharedSink = Arc::new(Mutex::new(sink));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(ansi)
        .with_writer(SinkWriter(Arc::clone(&sink)))
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)?;

    state.sink = Some(sink);
    state.active = true;
    tracing::debug!(filter = %config.filter, file = ?config.file, "log.init");
    Ok(())
}

/// Flush the sink. Events emitted afterwards are still written, but a
/// host should call this last.
pub fn shutdown() {
    let mut state = lock(&STATE);
    if let Some(sink) = &state.sink {
        // nowhere left to report a failed flush
        let _ = lock(sink).flush();
    }
    state.active = false;
}

/// `true` between [`init`] and [`shutdown`].
pub fn is_initialized() -> bool {
    lock(&STATE).active
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_level("WARNING").unwrap(), Level::WARN);
        assert_eq!(parse_level("Trace").unwrap(), Level::TRACE);
        match parse_level("loud") {
            Err(LogError::InvalidLevel(level)) => assert_eq!(level, "loud"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_config_defaults_and_override() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "info");
        assert!(config.file.is_none());
        assert!(config.ansi && config.with_target);

        let config = LogConfig::default().with_filter_override(Some("kit_process=debug".into()));
        assert_eq!(config.filter, "kit_process=debug");
        let config = LogConfig::default().with_filter_override(Some("  ".into()));
        assert_eq!(config.filter, "info");
        let config = LogConfig::default().with_filter_override(None);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn test_config_from_toml() {
        let config: LogConfig = toml::from_str(
            r#"
            level = "debug"
            file = "kit.log"
            ansi = false
            "#,
        )
        .unwrap();
        assert_eq!(config.filter, "debug");
        assert_eq!(config.file.as_deref(), Some(Path::new("kit.log")));
        assert!(!config.ansi);
        assert!(config.with_target);
    }

    #[test]
    fn test_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::default().file(dir.path().join("missing").join("kit.log"));
        let err = open_sink(&config).unwrap_err();
        assert!(matches!(err, LogError::OpenFailed { .. }));
    }

    // The only test that installs the global subscriber.
    #[test]
    fn test_init_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kit.log");
        std::fs::write(&path, "previous\n").unwrap();

        let bad = LogConfig::default().filter("kit=loud");
        assert!(matches!(init(&bad), Err(LogError::InvalidLevel(_))));
        assert!(!is_initialized());

        let config = LogConfig::default().filter("info").file(&path);
        init(&config).unwrap();
        assert!(is_initialized());
        assert!(matches!(init(&config), Err(LogError::AlreadyInitialized)));

        tracing::info!("[CMD] echo hello");
        shutdown();
        assert!(!is_initialized());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("previous\n"));
        assert!(contents.contains("[CMD] echo hello"));
    }
}
