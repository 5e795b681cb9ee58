//! Default consumer of scan results.
//!
//! [`ResultSink`] counts matches and errors into [`AppStats`], logs each
//! result and optionally appends matched lines to output files:
//!
//! - `save_matches_file`: every matched line, one per line
//! - `save_matches_folder`: one `<sanitized pattern>.txt` per pattern
//!
//! Each destination file has its own mutex, fetched from a registry keyed by
//! path, so concurrent writers never interleave partial lines and writers
//! of different files never contend.
use dashmap::DashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn};

use crate::config::ScanOptions;
use crate::filters::sanitize;
use crate::results::MatchResult;
use crate::stats::AppStats;

#[derive(Debug)]
pub struct ResultSink<'a> {
    stats: &'a AppStats,
    matches_file: Option<PathBuf>,
    matches_folder: Option<PathBuf>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl<'a> ResultSink<'a> {
    pub fn new(opts: &ScanOptions, stats: &'a AppStats) -> Self {
        Self {
            stats,
            matches_file: opts.save_matches_file.clone(),
            matches_folder: opts.save_matches_folder.clone(),
            locks: DashMap::new(),
        }
    }

    /// Handles one result; suitable as the scan callback via
    /// `|r| sink.handle(r)`.
    pub fn handle(&self, result: MatchResult) {
        if let Some(err) = &result.error {
            self.stats.record_error();
            error!(
                file = %result.file_path.display(),
                inner = result.inner_path.as_deref().unwrap_or(""),
                error = %err,
                "Process error"
            );
            return;
        }
        if !result.matched {
            return;
        }
        self.stats.record_match();

        let Some(line) = result.line.as_deref() else {
            info!(
                file = %result.file_path.display(),
                inner = result.inner_path.as_deref().unwrap_or(""),
                pattern = result.pattern.as_deref().unwrap_or(""),
                "Match found (full file)"
            );
            return;
        };
        info!(
            file = %result.location(),
            line = result.line_number.unwrap_or_default(),
            "Match found"
        );

        if let Some(path) = &self.matches_file {
            self.append(path, line);
        }
        if let (Some(folder), Some(pattern)) = (&self.matches_folder, result.pattern.as_deref()) {
            let path = folder.join(format!("{}.txt", sanitize(pattern)));
            self.append(&path, line);
        }
    }

    fn append(&self, path: &Path, line: &str) {
        let lock = self.lock_for(path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = append_line(path, line) {
            warn!(file = %path.display(), error = %e, "Failed to write match");
        }
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(path) {
            return Arc::clone(&lock);
        }
        Arc::clone(&self.locks.entry(path.to_path_buf()).or_default())
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    // One write per line keeps appends from different handles whole.
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    if !line.ends_with('\n') {
        record.push('\n');
    }
    file.write_all(record.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FinderError;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_counts_matches_and_errors() {
        let stats = AppStats::new();
        let sink = ResultSink::new(&ScanOptions::default(), &stats);

        sink.handle(MatchResult::line_match("a.txt", None, 1, "foo", "foo"));
        sink.handle(MatchResult::saved_file("b.txt", None, "foo"));
        sink.handle(MatchResult::failure("c.txt", None, FinderError::file_not_found("c.txt")));

        assert_eq!(stats.matches(), 2);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn test_writes_matches_file_and_pattern_files() {
        let dir = tempdir().unwrap();
        let opts = ScanOptions {
            save_matches_file: Some(dir.path().join("all.txt")),
            save_matches_folder: Some(dir.path().join("by-pattern")),
            ..Default::default()
        };
        let stats = AppStats::new();
        let sink = ResultSink::new(&opts, &stats);

        sink.handle(MatchResult::line_match("a.txt", None, 1, "foo one", "foo"));
        sink.handle(MatchResult::line_match("a.txt", None, 2, "bar1", "bar\\d+"));
        sink.handle(MatchResult::line_match("b.txt", None, 7, "foo two", "foo"));
        // Saved files have no line and write nothing.
        sink.handle(MatchResult::saved_file("c.txt", None, "foo"));

        let all = fs::read_to_string(dir.path().join("all.txt")).unwrap();
        assert_eq!(all, "foo one\nbar1\nfoo two\n");

        let foo = fs::read_to_string(dir.path().join("by-pattern/foo.txt")).unwrap();
        assert_eq!(foo, "foo one\nfoo two\n");
        // The backslash in the regex is not a valid file-name character.
        let bar = fs::read_to_string(dir.path().join("by-pattern/bar_d+.txt")).unwrap();
        assert_eq!(bar, "bar1\n");
    }

    #[test]
    fn test_concurrent_appends_keep_lines_whole() {
        let dir = tempdir().unwrap();
        let opts = ScanOptions {
            save_matches_file: Some(dir.path().join("all.txt")),
            ..Default::default()
        };
        let stats = AppStats::new();
        let sink = ResultSink::new(&opts, &stats);
        let line = "x".repeat(4096);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..50 {
                        sink.handle(MatchResult::line_match("f", None, i, line.clone(), "x"));
                    }
                });
            }
        });

        let all = fs::read_to_string(dir.path().join("all.txt")).unwrap();
        assert_eq!(all.lines().count(), 400);
        assert!(all.lines().all(|l| l == line));
        assert_eq!(stats.matches(), 400);
    }
}
