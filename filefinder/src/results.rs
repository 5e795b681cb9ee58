//! The unit of output handed to the result callback.
//!
//! A [`MatchResult`] is produced by the content scanner (or the walker, for
//! traversal errors) and moved into the callback. The scanner keeps no
//! reference to it afterwards, so a sink is free to store, forward or drop it.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::FinderError;

/// One report from a scan: a matching line, a saved file, or an error.
///
/// `matched` and `error` are mutually exclusive.
#[derive(Debug)]
pub struct MatchResult {
    /// The file on disk (the archive itself for archive entries)
    pub file_path: PathBuf,
    /// Path of the entry inside the archive; `None` for plain files
    pub inner_path: Option<String>,
    /// 1-based line number of the matching line (line mode only)
    pub line_number: Option<usize>,
    /// The matching line without its terminator (line mode only)
    pub line: Option<String>,
    /// Full file payload; unused when save-full streams to disk
    pub full_file: Option<Vec<u8>>,
    /// Whether this result reports a match
    pub matched: bool,
    /// Traversal or per-file error
    pub error: Option<FinderError>,
    /// Description of the pattern that matched
    pub pattern: Option<String>,
}

impl MatchResult {
    /// A matching line reported in line mode.
    pub fn line_match(
        file_path: impl Into<PathBuf>,
        inner_path: Option<String>,
        line_number: usize,
        line: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            inner_path,
            line_number: Some(line_number),
            line: Some(line.into()),
            full_file: None,
            matched: true,
            error: None,
            pattern: Some(pattern.into()),
        }
    }

    /// A whole file persisted by save-full mode.
    pub fn saved_file(
        file_path: impl Into<PathBuf>,
        inner_path: Option<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            inner_path,
            line_number: None,
            line: None,
            full_file: None,
            matched: true,
            error: None,
            pattern: Some(pattern.into()),
        }
    }

    /// An error tied to a file, directory or archive entry.
    pub fn failure(
        file_path: impl Into<PathBuf>,
        inner_path: Option<String>,
        error: FinderError,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            inner_path,
            line_number: None,
            line: None,
            full_file: None,
            matched: false,
            error: Some(error),
            pattern: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Borrowing view used in log fields, e.g. `logs.zip!/app/server.log`.
    pub fn location(&self) -> Location<'_> {
        Location {
            file_path: &self.file_path,
            inner_path: self.inner_path.as_deref(),
        }
    }
}

/// Display adapter for a file path plus optional archive entry.
#[derive(Debug, Clone, Copy)]
pub struct Location<'a> {
    pub file_path: &'a Path,
    pub inner_path: Option<&'a str>,
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner_path {
            Some(inner) => write!(f, "{}!/{}", self.file_path.display(), inner),
            None => write!(f, "{}", self.file_path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_match_creation() {
        let m = MatchResult::line_match("a.txt", None, 42, "Hello, world!", "Hello");
        assert!(m.matched);
        assert!(!m.is_error());
        assert_eq!(m.line_number, Some(42));
        assert_eq!(m.line.as_deref(), Some("Hello, world!"));
        assert_eq!(m.pattern.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_saved_file_has_no_line() {
        let m = MatchResult::saved_file("logs.zip", Some("a/b.log".to_string()), "re:x");
        assert!(m.matched);
        assert!(m.line.is_none());
        assert!(m.line_number.is_none());
        assert!(m.full_file.is_none());
    }

    #[test]
    fn test_failure_is_not_a_match() {
        let m = MatchResult::failure("gone.txt", None, FinderError::file_not_found("gone.txt"));
        assert!(!m.matched);
        assert!(m.is_error());
        assert!(m.pattern.is_none());
    }

    #[test]
    fn test_location_display() {
        let plain = MatchResult::saved_file("/var/log/x.txt", None, "p");
        assert_eq!(plain.location().to_string(), "/var/log/x.txt");

        let inner = MatchResult::saved_file("/tmp/a.zip", Some("dir/b.txt".to_string()), "p");
        assert_eq!(inner.location().to_string(), "/tmp/a.zip!/dir/b.txt");
    }
}
