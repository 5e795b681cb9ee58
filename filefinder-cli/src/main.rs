use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use filefinder::{
    AppStats, CancellationToken, FinderError, ResultSink, ScanOptions, Scanner, StatsSnapshot,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Exit status for options rejected before any scanning
const EXIT_USAGE: u8 = 2;
/// Exit status for a fail-fast abort
const EXIT_FAIL_FAST: u8 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "filefinder",
    author,
    version,
    about = "Search for pattern matches in files and archives across all disks",
    long_about = None
)]
struct Cli {
    /// Root paths to search (default: every detected disk)
    roots: Vec<PathBuf>,

    /// File with one search pattern per line (`re:`, `plain:i:` or plain text)
    #[arg(long)]
    pattern_file: Option<PathBuf>,

    /// Extensions to scan, comma separated (e.g. txt,log); wins over --blacklist
    #[arg(long, value_delimiter = ',')]
    whitelist: Vec<String>,

    /// Extensions to skip, comma separated
    #[arg(long, value_delimiter = ',')]
    blacklist: Vec<String>,

    /// Look inside archives (zip, tar, gz, bz2, xz, zst)
    #[arg(long)]
    archives: bool,

    /// Maximum directory depth (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    depth: usize,

    /// Number of worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Stop the scan after this long (e.g. 30s, 10m, 1h)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Abort the whole scan on the first error
    #[arg(long)]
    fail_fast: bool,

    /// Save every matching file in full instead of matched lines
    #[arg(long)]
    save_full: bool,

    /// Folder that receives full copies of matching files
    #[arg(long)]
    save_full_folder: Option<PathBuf>,

    /// Append every matched line to this file
    #[arg(long)]
    save_matches_file: Option<PathBuf>,

    /// Write matched lines into one file per pattern in this folder
    #[arg(long)]
    save_matches_folder: Option<PathBuf>,

    /// Maximum number of entries taken from a single archive
    #[arg(long)]
    max_archive_entries: Option<usize>,

    /// Write logs to this file (appended) instead of stderr
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Extra YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Show a live progress spinner
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn to_options(&self) -> ScanOptions {
        let mut opts = ScanOptions {
            roots: self.roots.clone(),
            pattern_file: self.pattern_file.clone(),
            whitelist: self.whitelist.clone(),
            blacklist: self.blacklist.clone(),
            max_depth: self.depth,
            threads: self.threads,
            archives: self.archives,
            fail_fast: self.fail_fast,
            save_full: self.save_full,
            save_full_folder: self.save_full_folder.clone(),
            save_matches_file: self.save_matches_file.clone(),
            save_matches_folder: self.save_matches_folder.clone(),
            ..Default::default()
        };
        if let Some(max) = self.max_archive_entries {
            opts.max_archive_entries = max;
        }
        if let Some(level) = &self.log_level {
            opts.log_level = level.clone();
        }
        opts
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let opts = match load_options(&cli) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    setup_logging(&opts.log_level, cli.logfile.as_ref());
    info!("FileFinder started");

    run(&cli, opts)
}

fn load_options(cli: &Cli) -> anyhow::Result<ScanOptions> {
    let file_opts = ScanOptions::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    Ok(file_opts.merge_with_cli(cli.to_options()))
}

fn setup_logging(level: &str, logfile: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut open_failure = None;
    let file = logfile.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                open_failure = Some((path.clone(), e));
                None
            }
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(BoxMakeWriter::new(Mutex::new(file)))
            .init(),
        None => builder.with_writer(BoxMakeWriter::new(std::io::stderr)).init(),
    }

    if let Some((path, e)) = open_failure {
        warn!(file = %path.display(), error = %e, "Failed to open log file, logging to stderr");
    }
}

fn run(cli: &Cli, mut opts: ScanOptions) -> ExitCode {
    if let Err(e) = opts.validate() {
        return usage_error(&e);
    }

    if opts.roots.is_empty() {
        opts.roots = filefinder::search::detect_roots();
        info!(roots = ?opts.roots, "No search paths provided, using all available roots");
    } else {
        opts.roots.retain(|root| {
            let exists = root.symlink_metadata().is_ok();
            if !exists {
                warn!(path = %root.display(), "Path does not exist or is not accessible");
            }
            exists
        });
        if opts.roots.is_empty() {
            error!("No valid search paths provided. Exiting.");
            return ExitCode::SUCCESS;
        }
    }

    let scanner = match Scanner::new(opts) {
        Ok(scanner) => scanner,
        Err(e) => return usage_error(&e),
    };
    let token = match cli.timeout.filter(|t| !t.is_zero()) {
        Some(timeout) => CancellationToken::with_timeout(timeout),
        None => CancellationToken::new(),
    };
    let signal_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || signal_token.cancel()) {
        warn!(error = %e, "Failed to install signal handler");
    }

    let stats = AppStats::new();
    let sink = ResultSink::new(scanner.options(), &stats);
    let finished = AtomicBool::new(false);

    let result = thread::scope(|s| {
        if cli.progress {
            s.spawn(|| show_progress(&stats, &finished));
        }
        let result = scanner.scan(&token, &stats, |r| sink.handle(r));
        finished.store(true, Ordering::Release);
        result
    });

    print_summary(&stats.snapshot());
    exit_status(result)
}

fn usage_error(e: &FinderError) -> ExitCode {
    error!(error = %e, "Invalid options");
    eprintln!("{} {}", "error:".red().bold(), e);
    ExitCode::from(EXIT_USAGE)
}

fn exit_status(result: Result<(), FinderError>) -> ExitCode {
    ExitCode::from(exit_code(&result))
}

/// Only a fail-fast abort fails the run once scanning has started; other
/// stops are logged and the counters stand as the report.
fn exit_code(result: &Result<(), FinderError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) if e.is_cancellation() => {
            warn!(reason = %e, "Scan stopped");
            0
        }
        Err(e) if e.is_fail_fast() => {
            error!("Scan aborted (fail-fast)");
            EXIT_FAIL_FAST
        }
        Err(e) => {
            error!(error = %e, "Scan failed");
            0
        }
    }
}

fn show_progress(stats: &AppStats, finished: &AtomicBool) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    while !finished.load(Ordering::Acquire) {
        let s = stats.snapshot();
        bar.set_message(format!(
            "found {} | processed {} | matches {} | errors {}",
            s.files_found, s.files_processed, s.matches, s.errors
        ));
        thread::sleep(Duration::from_millis(200));
    }
    bar.finish_and_clear();
}

fn print_summary(s: &StatsSnapshot) {
    println!(
        "\n{}",
        format!(
            "======= Scan finished in {} =======",
            humantime::format_duration(Duration::from_millis(s.elapsed.as_millis() as u64))
        )
        .bold()
    );
    println!("Files found:     {}", s.files_found);
    println!("Files scanned:   {}", s.files_processed);
    println!("Matches found:   {}", s.matches.to_string().green());
    let errors = s.errors.to_string();
    if s.errors > 0 {
        println!("Errors:          {}", errors.red());
    } else {
        println!("Errors:          {}", errors);
    }
    println!("Throughput:      {:.1} files/s", s.files_per_sec());
}
