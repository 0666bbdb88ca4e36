// ============================================================================
// Error Types with Structured Codes
// ============================================================================

/// Error codes for process operations (for machine-readable errors)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProcessErrorCode {
    /// Child process could not be created
    SpawnFailed = 4100,
    /// A redirection file could not be opened
    RedirectFailed = 4101,
    /// A pipe for a child stream could not be created
    PipeCreateFailed = 4102,
    /// Waiting on or probing the child failed
    WaitFailed = 4103,
    /// Pipe read/write failed for a reason other than would-block
    Io = 4104,
    /// Operation on an absent or released process or pipe end
    InvalidHandle = 4105,
    /// Caller passed an argument the OS cannot represent
    InvalidArgument = 4106,
}

impl std::fmt::Display for ProcessErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// Errors reported by the process engine.
///
/// Every variant is reported synchronously to the immediate caller and is
/// never retried internally. A would-block condition is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("[{code}] Failed to spawn: {message}")]
    SpawnFailed { code: u32, message: String },

    #[error("[{code}] Redirection failed: {message}")]
    RedirectFailed { code: u32, message: String },

    #[error("[{code}] Pipe creation failed: {message}")]
    PipeCreateFailed { code: u32, message: String },

    #[error("[{code}] Wait failed: {message}")]
    WaitFailed { code: u32, message: String },

    #[error("[{code}] IO error: {message}")]
    Io { code: u32, message: String },

    #[error("[{code}] Invalid handle: {message}")]
    InvalidHandle { code: u32, message: String },

    #[error("[{code}] Invalid argument: {message}")]
    InvalidArgument { code: u32, message: String },
}

impl ProcessError {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            code: ProcessErrorCode::SpawnFailed as u32,
            message: message.into(),
        }
    }

    pub fn redirect_failed(message: impl Into<String>) -> Self {
        Self::RedirectFailed {
            code: ProcessErrorCode::RedirectFailed as u32,
            message: message.into(),
        }
    }

    pub fn pipe_create_failed(message: impl Into<String>) -> Self {
        Self::PipeCreateFailed {
            code: ProcessErrorCode::PipeCreateFailed as u32,
            message: message.into(),
        }
    }

    pub fn wait_failed(message: impl Into<String>) -> Self {
        Self::WaitFailed {
            code: ProcessErrorCode::WaitFailed as u32,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            code: ProcessErrorCode::Io as u32,
            message: message.into(),
        }
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::InvalidHandle {
            code: ProcessErrorCode::InvalidHandle as u32,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            code: ProcessErrorCode::InvalidArgument as u32,
            message: message.into(),
        }
    }

    /// Numeric code of this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::SpawnFailed { code, .. }
            | Self::RedirectFailed { code, .. }
            | Self::PipeCreateFailed { code, .. }
            | Self::WaitFailed { code, .. }
            | Self::Io { code, .. }
            | Self::InvalidHandle { code, .. }
            | Self::InvalidArgument { code, .. } => *code,
        }
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::InvalidInput => Self::invalid_argument(e.to_string()),
            _ => Self::io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;
