use crossbeam::channel::{self, Receiver};
use crossbeam::select;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::archive;
use super::matcher::{load_patterns, PatternSet};
use super::processor::ContentScanner;
use super::scheduler::{task_queue, ScanTask, TaskSender, WorkerPool};
use super::walker::{self, detect_roots, WalkEvent};
use crate::cancel::CancellationToken;
use crate::config::ScanOptions;
use crate::errors::{FinderError, FinderResult};
use crate::filters::{is_archive, ExtensionFilter};
use crate::results::MatchResult;
use crate::stats::AppStats;

/// Period of the progress log line
const STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of one scan. Only the controller loop moves between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    Scanning,
    Draining,
    Done,
    Aborted,
}

/// A validated, prepared scan with its compiled patterns.
///
/// Building a `Scanner` is where configuration errors surface: a missing
/// or unreadable pattern file, an invalid regex or inconsistent options.
/// Once built, [`Scanner::scan`] only fails for stop causes.
#[derive(Debug, Clone)]
pub struct Scanner {
    opts: ScanOptions,
    filter: ExtensionFilter,
    patterns: PatternSet,
}

impl Scanner {
    pub fn new(opts: ScanOptions) -> FinderResult<Self> {
        opts.validate()?;
        let opts = opts.prepare();
        let pattern_file = opts
            .pattern_file
            .as_deref()
            .ok_or_else(|| FinderError::config_error("pattern-file is required"))?;
        let patterns = load_patterns(pattern_file)?;
        let filter = opts.extension_filter();
        Ok(Self {
            opts,
            filter,
            patterns,
        })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    /// Runs the scan to completion, delivering every result to `on_match`.
    ///
    /// `on_match` is called concurrently from producer and worker threads.
    /// Traversal and per-file errors only reach the caller through it.
    ///
    /// Returns:
    /// - `Ok(())` once every queued task has been processed
    /// - the token's stop error ([`FinderError::Cancelled`] or
    ///   [`FinderError::DeadlineExceeded`]) when `token` fires; this wins
    ///   over a concurrent fail-fast trip
    /// - [`FinderError::FailFast`] when fail-fast is on and any error
    ///   result was produced
    /// - [`FinderError::WorkerPanic`] / [`FinderError::WorkerSpawn`] for
    ///   internal faults
    pub fn scan<F>(&self, token: &CancellationToken, stats: &AppStats, on_match: F) -> FinderResult<()>
    where
        F: Fn(MatchResult) + Sync,
    {
        let roots = if self.opts.roots.is_empty() {
            let detected = detect_roots();
            debug!(roots = ?detected, "No roots given, using detected roots");
            detected
        } else {
            self.opts.roots.clone()
        };

        // Fail-fast cancels this child without touching the caller's token.
        let internal = token.child();
        let reporter = Reporter::new(&on_match, self.opts.fail_fast, &internal);
        let content = ContentScanner::new(&self.patterns, self.opts.save_full_target());
        let handle_task = |task: ScanTask| {
            if internal.is_cancelled() {
                return;
            }
            stats.record_processed();
            content.scan_task(&task, &internal, |r| reporter.report(r));
        };

        info!(
            roots = roots.len(),
            workers = self.opts.threads,
            patterns = self.patterns.len(),
            archives = self.opts.archives,
            save_full = self.opts.save_full,
            "Starting scan"
        );

        let outcome = crossbeam::thread::scope(|s| -> FinderResult<ScanPhase> {
            let pool = WorkerPool::start(s, self.opts.threads, &handle_task)?;
            let (task_tx, task_rx) = task_queue(self.opts.queue_capacity, &internal);
            let (walk_tx, walk_rx) = channel::unbounded();

            for (id, root) in roots.iter().enumerate() {
                let producer = Producer {
                    opts: &self.opts,
                    filter: &self.filter,
                    stats,
                    reporter: &reporter,
                    tasks: task_tx.clone(),
                    token: &internal,
                };
                let walk_tx = walk_tx.clone();
                s.builder()
                    .name(format!("ff-walker-{id}"))
                    .spawn(move |_| {
                        let result = producer.run(root);
                        let _ = walk_tx.send((root.clone(), result));
                    })
                    .map_err(FinderError::WorkerSpawn)?;
            }
            // Producers own the remaining handles; the queue closes when they finish.
            drop(task_tx);
            drop(walk_tx);

            let phase = control(&pool, &task_rx, &walk_rx, &reporter, &internal, stats);
            drop(task_rx);
            if phase == ScanPhase::Aborted {
                internal.cancel();
            }
            for (root, result) in walk_rx.try_iter() {
                log_walk_result(&root, &result);
            }

            // Queued work finishes (or is skipped once cancelled) before we
            // return. In-flight files stop within one read once cancelled.
            let (drained_tx, drained_rx) = channel::bounded::<()>(0);
            let ticker = s
                .builder()
                .name("ff-progress".to_string())
                .spawn(move |_| tick_until(STATS_INTERVAL, &drained_rx, || stats.log_progress()));
            if let Err(e) = ticker {
                debug!(error = %e, "No progress ticker while draining");
            }
            pool.wait();
            drop(drained_tx);
            let phase = if phase == ScanPhase::Draining {
                ScanPhase::Done
            } else {
                phase
            };
            debug!(phase = ?phase, "Scan phase");
            Ok(phase)
        });

        let snapshot = stats.snapshot();
        info!(
            elapsed = ?snapshot.elapsed,
            found = snapshot.files_found,
            processed = snapshot.files_processed,
            matches = snapshot.matches,
            errors = snapshot.errors,
            "Scan finished"
        );

        if let Some(stop) = token.error() {
            return Err(stop);
        }
        if reporter.tripped() {
            return Err(FinderError::FailFast);
        }
        match outcome {
            Err(_) => {
                error!("A scan worker panicked");
                Err(FinderError::WorkerPanic)
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(ScanPhase::Done)) => Ok(()),
            // Aborted without an external stop or a fail-fast trip.
            Ok(Ok(_)) => Err(internal.error().unwrap_or(FinderError::Cancelled)),
        }
    }
}

/// Loads patterns, runs one scan and returns how it ended.
///
/// Shorthand for [`Scanner::new`] followed by [`Scanner::scan`].
pub fn scan<F>(
    token: &CancellationToken,
    opts: &ScanOptions,
    stats: &AppStats,
    on_match: F,
) -> FinderResult<()>
where
    F: Fn(MatchResult) + Sync,
{
    Scanner::new(opts.clone())?.scan(token, stats, on_match)
}

/// The controller loop: dispatches queued tasks to the pool until the queue
/// closes (`Draining`) or the scan must stop (`Aborted`).
fn control<F>(
    pool: &WorkerPool,
    tasks: &Receiver<ScanTask>,
    walks: &Receiver<(PathBuf, FinderResult<()>)>,
    reporter: &Reporter<'_, F>,
    token: &CancellationToken,
    stats: &AppStats,
) -> ScanPhase
where
    F: Fn(MatchResult),
{
    let ticker = channel::tick(STATS_INTERVAL);
    let deadline = token.deadline_signal();
    let walks_closed = channel::never();
    let mut walking = true;
    debug!(phase = ?ScanPhase::Scanning, "Scan phase");

    loop {
        let walk_events = if walking { walks } else { &walks_closed };
        select! {
            recv(tasks) -> msg => match msg {
                Ok(task) => {
                    if let Err(e) = pool.submit(task, token) {
                        if e.is_cancellation() {
                            return ScanPhase::Aborted;
                        }
                        error!(error = %e, "Task submission failed");
                        if reporter.fail_fast {
                            reporter.trip();
                            return ScanPhase::Aborted;
                        }
                    }
                }
                Err(_) => {
                    debug!(phase = ?ScanPhase::Draining, "Scan phase");
                    return ScanPhase::Draining;
                }
            },
            recv(walk_events) -> msg => match msg {
                Ok((root, result)) => log_walk_result(&root, &result),
                Err(_) => walking = false,
            },
            recv(ticker) -> _ => stats.log_progress(),
            recv(token.done()) -> _ => return ScanPhase::Aborted,
            recv(deadline) -> _ => {
                // Flip the token so every stage sees the timeout.
                token.is_cancelled();
                return ScanPhase::Aborted;
            }
        }
    }
}

/// Calls `on_tick` every `interval` until `done` disconnects.
fn tick_until<T>(interval: Duration, done: &Receiver<T>, mut on_tick: impl FnMut()) {
    let ticker = channel::tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => on_tick(),
            recv(done) -> _ => return,
        }
    }
}

fn log_walk_result(root: &Path, result: &FinderResult<()>) {
    match result {
        Ok(()) => debug!(root = %root.display(), "Walk finished"),
        Err(e) if is_stop(e) => trace!(root = %root.display(), reason = %e, "Walk stopped"),
        Err(e) => error!(root = %root.display(), error = %e, "Walk failed"),
    }
}

/// Errors that end a producer without describing a file
fn is_stop(e: &FinderError) -> bool {
    e.is_cancellation() || matches!(e, FinderError::FailFast | FinderError::PoolClosed)
}

/// Delivers results and trips fail-fast on errors.
struct Reporter<'a, F> {
    on_match: &'a F,
    fail_fast: bool,
    tripped: AtomicBool,
    token: &'a CancellationToken,
}

impl<'a, F: Fn(MatchResult)> Reporter<'a, F> {
    fn new(on_match: &'a F, fail_fast: bool, token: &'a CancellationToken) -> Self {
        Self {
            on_match,
            fail_fast,
            tripped: AtomicBool::new(false),
            token,
        }
    }

    fn report(&self, result: MatchResult) {
        // Trip before delivering so no worker opens another file meanwhile.
        if self.fail_fast && result.is_error() {
            self.trip();
        }
        (self.on_match)(result);
    }

    fn trip(&self) {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            warn!("Fail-fast triggered, aborting scan");
        }
        self.token.cancel();
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// One traversal producer per root.
struct Producer<'a, F> {
    opts: &'a ScanOptions,
    filter: &'a ExtensionFilter,
    stats: &'a AppStats,
    reporter: &'a Reporter<'a, F>,
    tasks: TaskSender,
    token: &'a CancellationToken,
}

impl<F: Fn(MatchResult)> Producer<'_, F> {
    fn run(&self, root: &Path) -> FinderResult<()> {
        walker::walk(root, self.opts.max_depth, self.token, |event| match event {
            WalkEvent::File(path) => self.visit_file(path),
            WalkEvent::Error { path, error } => self.traversal_error(path, error),
        })
    }

    fn visit_file(&self, path: PathBuf) -> FinderResult<()> {
        // Archives pass the filter themselves before their entries do.
        if !self.filter.allows(&path) {
            return Ok(());
        }
        if is_archive(&path) {
            if !self.opts.archives {
                trace!(file = %path.display(), "Skipping archive");
                return Ok(());
            }
            return self.visit_archive(path);
        }
        self.tasks.push(ScanTask::file(path))?;
        self.stats.record_found();
        Ok(())
    }

    fn visit_archive(&self, path: PathBuf) -> FinderResult<()> {
        let expanded = archive::expand(
            &path,
            self.filter,
            self.opts.max_archive_entries,
            self.token,
            |inner| {
                self.tasks.push(ScanTask::archive_entry(path.clone(), inner))?;
                self.stats.record_found();
                Ok(())
            },
        );
        match expanded {
            Ok(_) => Ok(()),
            Err(e) if is_stop(&e) => Err(e),
            Err(e) => {
                error!(archive = %path.display(), error = %e, "Failed to open archive");
                self.traversal_error(path, e)
            }
        }
    }

    fn traversal_error(&self, path: PathBuf, error: FinderError) -> FinderResult<()> {
        self.reporter.report(MatchResult::failure(path, None, error));
        if self.reporter.fail_fast {
            return Err(FinderError::FailFast);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn options(dir: &Path, patterns: &str) -> ScanOptions {
        let pattern_file = dir.join("patterns.txt");
        std::fs::write(&pattern_file, patterns).unwrap();
        let root = dir.join("data");
        std::fs::create_dir_all(&root).unwrap();
        ScanOptions {
            roots: vec![root],
            pattern_file: Some(pattern_file),
            threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_scan_with_stats() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "test\n");
        std::fs::write(opts.roots[0].join("test.txt"), "test line\ntest line 2\n").unwrap();

        let stats = AppStats::new();
        let matches = AtomicUsize::new(0);
        scan(&CancellationToken::new(), &opts, &stats, |r| {
            if r.matched {
                matches.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        assert_eq!(matches.load(Ordering::SeqCst), 2);
        assert_eq!(stats.files_found(), 1);
        assert_eq!(stats.files_processed(), 1);
    }

    #[test]
    fn test_configuration_errors_surface_before_scanning() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "re:(broken\n");
        let stats = AppStats::new();
        let err = scan(&CancellationToken::new(), &opts, &stats, |_| {}).unwrap_err();
        assert!(matches!(err, FinderError::InvalidRegex { .. }));
        assert_eq!(stats.files_found(), 0);

        let opts = ScanOptions {
            save_full: true,
            ..options(dir.path(), "x\n")
        };
        assert!(Scanner::new(opts).unwrap_err().is_configuration());
    }

    #[test]
    fn test_archives_disabled_skips_archive_files() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "foo\n");
        std::fs::write(opts.roots[0].join("a.txt"), "foo\n").unwrap();
        std::fs::write(opts.roots[0].join("b.zip"), "foo\n").unwrap();

        let stats = AppStats::new();
        let files = Mutex::new(Vec::new());
        scan(&CancellationToken::new(), &opts, &stats, |r| {
            files.lock().unwrap().push(r.file_path)
        })
        .unwrap();

        assert_eq!(stats.files_found(), 1);
        assert_eq!(files.into_inner().unwrap(), vec![opts.roots[0].join("a.txt")]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path(), "foo\n");
        std::fs::write(opts.roots[0].join("a.txt"), "foo\n").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let stats = AppStats::new();
        let err = scan(&token, &opts, &stats, |_| {}).unwrap_err();
        assert!(matches!(err, FinderError::Cancelled));
        assert_eq!(stats.files_processed(), 0);
    }

    #[test]
    fn test_tick_until_stops_when_done() {
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let ticks = AtomicUsize::new(0);
        std::thread::scope(|s| {
            s.spawn(|| {
                tick_until(Duration::from_millis(5), &done_rx, || {
                    ticks.fetch_add(1, Ordering::SeqCst);
                })
            });
            std::thread::sleep(Duration::from_millis(60));
            drop(done_tx);
        });
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_reporter_trips_only_on_errors() {
        let token = CancellationToken::new();
        let delivered = AtomicUsize::new(0);
        let on_match = |_r: MatchResult| {
            delivered.fetch_add(1, Ordering::SeqCst);
        };
        let reporter = Reporter::new(&on_match, true, &token);

        reporter.report(MatchResult::line_match("a", None, 1, "x", "x"));
        assert!(!reporter.tripped());
        assert!(!token.is_cancelled());

        reporter.report(MatchResult::failure("b", None, FinderError::file_not_found("b")));
        assert!(reporter.tripped());
        assert!(token.is_cancelled());
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }
}
