use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::{FinderError, FinderResult};
use crate::filters::{normalize_extensions, ExtensionFilter};

/// Entry ceiling per archive (zip-bomb guard)
pub const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 10_000;
/// Capacity of the task queue between producers and the worker pool
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;
/// Lower bound for the automatic worker count
pub const MIN_AUTO_THREADS: usize = 32;

/// Options for one scan.
///
/// # Configuration Locations
///
/// Defaults can come from YAML files, in increasing order of precedence:
/// 1. Global `$HOME/.config/filefinder/config.yaml`
/// 2. Local `.filefinder.yaml` in the current directory
/// 3. A file passed with `--config`
///
/// Command-line flags override all of them (see [`ScanOptions::merge_with_cli`]).
///
/// # Configuration Format
///
/// ```yaml
/// pattern_file: "/etc/filefinder/patterns.txt"
/// roots: ["/srv", "/home"]
/// whitelist: ["txt", "log", "cfg"]
/// archives: true
/// max_depth: 0          # 0 = unlimited
/// threads: 0            # 0 = max(32, 4 x CPUs)
/// fail_fast: false
/// save_full: true
/// save_full_folder: "/found_files"
/// save_matches_file: "/tmp/matches.txt"
/// save_matches_folder: "/tmp/by-pattern"
/// ```
///
/// # Example
///
/// ```
/// use filefinder::ScanOptions;
///
/// let opts = ScanOptions {
///     pattern_file: Some("patterns.txt".into()),
///     archives: true,
///     ..Default::default()
/// };
/// assert!(opts.validate().is_ok());
/// ```
///
/// # Lifecycle
///
/// Options are plain data with public fields. [`ScanOptions::prepare`]
/// normalizes the extension lists and resolves the worker count; the
/// scanner builds its extension lookup from that prepared snapshot once and
/// shares it with all workers without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Directories (or files) to scan; empty means auto-detect
    pub roots: Vec<PathBuf>,

    /// Pattern file, one pattern per line (required)
    pub pattern_file: Option<PathBuf>,

    /// Extensions to include; when non-empty the blacklist is ignored
    pub whitelist: Vec<String>,

    /// Extensions to exclude
    pub blacklist: Vec<String>,

    /// Maximum traversal depth below each root (0 = unlimited)
    pub max_depth: usize,

    /// Worker count (0 = max(32, 4 x logical CPUs))
    pub threads: usize,

    /// Look inside archives
    pub archives: bool,

    /// Abort the whole scan on the first error
    pub fail_fast: bool,

    /// Copy every matching file in full to `save_full_folder`
    pub save_full: bool,

    /// Destination for save-full copies
    pub save_full_folder: Option<PathBuf>,

    /// Append every matched line here
    pub save_matches_file: Option<PathBuf>,

    /// One `<pattern>.txt` per distinct pattern here
    pub save_matches_folder: Option<PathBuf>,

    /// Entry ceiling per archive
    pub max_archive_entries: usize,

    /// Task queue capacity
    pub queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            pattern_file: None,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            max_depth: 0,
            threads: 0,
            archives: false,
            fail_fast: false,
            save_full: false,
            save_full_folder: None,
            save_matches_file: None,
            save_matches_folder: None,
            max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_level: default_log_level(),
        }
    }
}

/// Worker count used when `threads` is 0
pub fn default_thread_count() -> usize {
    (num_cpus::get() * 4).max(MIN_AUTO_THREADS)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ScanOptions {
    /// Loads options from the default config locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads options from the default locations plus an explicit file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("filefinder/config.yaml")),
            Some(PathBuf::from(".filefinder.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist.
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Overlays command-line values onto file values.
    ///
    /// A CLI value wins when it was actually given: non-empty lists,
    /// `Some` paths, `true` flags and non-zero numbers.
    pub fn merge_with_cli(mut self, cli: ScanOptions) -> Self {
        if !cli.roots.is_empty() {
            self.roots = cli.roots;
        }
        if cli.pattern_file.is_some() {
            self.pattern_file = cli.pattern_file;
        }
        if !cli.whitelist.is_empty() {
            self.whitelist = cli.whitelist;
        }
        if !cli.blacklist.is_empty() {
            self.blacklist = cli.blacklist;
        }
        if cli.max_depth != 0 {
            self.max_depth = cli.max_depth;
        }
        if cli.threads != 0 {
            self.threads = cli.threads;
        }
        self.archives |= cli.archives;
        self.fail_fast |= cli.fail_fast;
        self.save_full |= cli.save_full;
        if cli.save_full_folder.is_some() {
            self.save_full_folder = cli.save_full_folder;
        }
        if cli.save_matches_file.is_some() {
            self.save_matches_file = cli.save_matches_file;
        }
        if cli.save_matches_folder.is_some() {
            self.save_matches_folder = cli.save_matches_folder;
        }
        if cli.max_archive_entries != DEFAULT_MAX_ARCHIVE_ENTRIES {
            self.max_archive_entries = cli.max_archive_entries;
        }
        if cli.queue_capacity != DEFAULT_QUEUE_CAPACITY {
            self.queue_capacity = cli.queue_capacity;
        }
        if cli.log_level != default_log_level() {
            self.log_level = cli.log_level;
        }
        self
    }

    /// Checks the invariants that must hold before any scanning starts
    pub fn validate(&self) -> FinderResult<()> {
        match &self.pattern_file {
            None => return Err(FinderError::config_error("pattern-file is required")),
            Some(p) if p.as_os_str().is_empty() => {
                return Err(FinderError::config_error("pattern-file is required"))
            }
            Some(_) => {}
        }
        if self.save_full && self.save_full_folder.is_none() {
            return Err(FinderError::config_error(
                "save-full-folder must be set when --save-full is used",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FinderError::config_error("queue capacity must be positive"));
        }
        if self.max_archive_entries == 0 {
            return Err(FinderError::config_error(
                "max archive entries must be positive",
            ));
        }
        Ok(())
    }

    /// Normalizes the extension lists and resolves defaults. Idempotent.
    pub fn prepare(mut self) -> Self {
        self.whitelist = normalize_extensions(&self.whitelist);
        self.blacklist = normalize_extensions(&self.blacklist);
        if self.threads == 0 {
            self.threads = default_thread_count();
        }
        self
    }

    /// Builds the read-only extension lookup for these lists
    pub fn extension_filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(&self.whitelist, &self.blacklist)
    }

    /// Save-full destination, when save-full is active
    pub fn save_full_target(&self) -> Option<&Path> {
        if self.save_full {
            self.save_full_folder.as_deref()
        } else {
            None
        }
    }
}
