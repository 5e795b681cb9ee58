//! File filtering and path helpers.
//!
//! Extension filtering runs once per file from many threads at once, so the
//! whitelist and blacklist are turned into hash sets before the scan starts
//! and are never mutated afterwards. Lookups are O(1) and need no locking.
//!
//! Rules:
//! - A non-empty whitelist fully overrides the blacklist: only listed
//!   extensions pass, whatever the blacklist says.
//! - Otherwise anything not on the blacklist passes.
//! - Extensions are compared lower-cased and without the leading dot.
use std::collections::HashSet;
use std::path::Path;

use crate::search::archive::ArchiveFormat;

/// Read-only extension lookup built from the whitelist/blacklist options
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl ExtensionFilter {
    pub fn new<W, B>(whitelist: W, blacklist: B) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            whitelist: normalize_extensions(whitelist).into_iter().collect(),
            blacklist: normalize_extensions(blacklist).into_iter().collect(),
        }
    }

    pub fn uses_whitelist(&self) -> bool {
        !self.whitelist.is_empty()
    }

    /// Checks a normalized extension (`"txt"`, `""` for none)
    pub fn allows_extension(&self, ext: &str) -> bool {
        if self.uses_whitelist() {
            return self.whitelist.contains(ext);
        }
        !self.blacklist.contains(ext)
    }

    /// Checks a file path or an archive inner path
    pub fn allows(&self, path: &Path) -> bool {
        self.allows_extension(&extension_of(path))
    }
}

/// Lower-cased extension without the dot; empty when there is none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Normalizes user-supplied extension lists.
///
/// Accepts repeated values and comma separated lists alike:
/// `[".TXT", "log, md"]` becomes `["txt", "log", "md"]`.
pub fn normalize_extensions<I>(raw: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    raw.into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Whether the file name marks a recognized archive
pub fn is_archive(path: &Path) -> bool {
    ArchiveFormat::detect(path).is_some()
}

/// Makes a string safe to use as a single file name.
///
/// Path separators and `: * ? " < > |` become `_`.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Flattens a source path into one file-name component.
///
/// Separators and drive/volume punctuation become `_`, so
/// `/var/log/app.log` maps to `_var_log_app.log` and `C:\data\a.txt` to
/// `C__data_a.txt`.
pub fn flatten_path(path: &str) -> String {
    path.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
