use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one scan invocation.
///
/// Every worker updates these concurrently; all updates are relaxed atomic
/// increments, so no lock is ever taken on the hot path. One `AppStats`
/// is created per scan and shared by reference with the controller,
/// the workers and the result sink.
#[derive(Debug)]
pub struct AppStats {
    started: Instant,
    files_found: AtomicU64,
    files_processed: AtomicU64,
    matches: AtomicU64,
    errors: AtomicU64,
}

impl AppStats {
    /// Creates the counters and starts the clock
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            files_found: AtomicU64::new(0),
            files_processed: AtomicU64::new(0),
            matches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Records a file or archive entry queued for scanning
    pub fn record_found(&self) {
        self.files_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a task picked up by a worker
    pub fn record_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_found(&self) -> u64 {
        self.files_found.load(Ordering::Relaxed)
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn matches(&self) -> u64 {
        self.matches.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Gets a consistent-enough copy of all counters for reporting
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            elapsed: self.elapsed(),
            files_found: self.files_found(),
            files_processed: self.files_processed(),
            matches: self.matches(),
            errors: self.errors(),
        }
    }

    /// Logs the periodic progress line
    pub fn log_progress(&self) {
        let s = self.snapshot();
        info!(
            found = s.files_found,
            processed = s.files_processed,
            matches = s.matches,
            errors = s.errors,
            "Stats"
        );
    }
}

impl Default for AppStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`AppStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub files_found: u64,
    pub files_processed: u64,
    pub matches: u64,
    pub errors: u64,
}

impl StatsSnapshot {
    /// Files processed per second over the whole run
    pub fn files_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.files_processed as f64 / secs
    }
}
