/// Error types for filefinder.
///
/// Errors fall into three groups with different propagation rules:
///
/// 1. **Configuration errors** (`PatternFile`, `InvalidRegex`, `ConfigError`)
///    are returned synchronously from [`crate::search::Scanner::new`]
///    before any traversal starts.
///
/// 2. **Data-path errors** (`Io`, `Archive`, `PermissionDenied`, `FileNotFound`)
///    describe a single file, directory or archive entry. They never unwind
///    the scan; they travel inside [`crate::results::MatchResult::error`]
///    and reach the caller through the result callback.
///
/// 3. **Stop causes** (`FailFast`, `Cancelled`, `DeadlineExceeded`,
///    `WorkerSpawn`, `WorkerPanic`, `PoolClosed`) end a scan early. The
///    fail-fast sentinel is kept distinct from cancellation so callers can
///    tell "stop because the user asked for fail-fast" from "stop because of
///    a signal or timeout" from "stop because of an internal fault".
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for scan operations
pub type FinderResult<T> = Result<T, FinderError>;

/// Errors that can occur while loading patterns or scanning
#[derive(Error, Debug)]
pub enum FinderError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Cannot read pattern file {path}: {source}")]
    PatternFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid regex on line {line} ({pattern:?}): {source}")]
    InvalidRegex {
        line: usize,
        pattern: String,
        source: regex::Error,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Archive error in {path}: {message}")]
    Archive { path: PathBuf, message: String },
    #[error("fail-fast: scan aborted on first error")]
    FailFast,
    #[error("scan cancelled")]
    Cancelled,
    #[error("scan deadline exceeded")]
    DeadlineExceeded,
    #[error("Failed to start worker: {0}")]
    WorkerSpawn(std::io::Error),
    #[error("A scan worker panicked")]
    WorkerPanic,
    #[error("Worker pool is closed")]
    PoolClosed,
}

impl FinderError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn archive(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Maps an I/O error on `path` to the most specific variant.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }

    /// True for the fail-fast sentinel.
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::FailFast)
    }

    /// True when the scan stopped because its token was cancelled or timed out.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// True for errors raised before any traversal begins.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::PatternFile { .. } | Self::InvalidRegex { .. } | Self::ConfigError(_)
        )
    }
}

impl From<config::ConfigError> for FinderError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}
