use ignore::WalkBuilder;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::errors::{FinderError, FinderResult};

/// What the walker hands to its visitor
#[derive(Debug)]
pub enum WalkEvent {
    /// A regular file, or a symlink that resolves to one (or to nothing)
    File(PathBuf),
    /// A traversal failure tied to `path` (permission denied, vanished
    /// entry, unreadable directory). The caller decides whether to record
    /// it and continue or to abort.
    Error { path: PathBuf, error: FinderError },
}

/// Walks `root` depth-first and calls `visit` for every regular file and
/// for every traversal error.
///
/// Siblings are visited in file-name order.
/// The root itself is depth 0 and a file directly inside it is depth 1.
/// With `max_depth > 0` whole subtrees deeper than that are pruned.
/// FIFOs, sockets and devices are skipped since reading them can block
/// forever or never end. Symlinks are never followed for traversal: one
/// resolving to a regular file is reported, one resolving to anything else
/// is skipped, and a dangling one is reported so opening it fails.
///
/// The token is consulted before each entry. Cancellation returns the
/// token's stop error; an `Err` from `visit` stops the walk and is returned.
pub fn walk<F>(
    root: &Path,
    max_depth: usize,
    token: &CancellationToken,
    mut visit: F,
) -> FinderResult<()>
where
    F: FnMut(WalkEvent) -> FinderResult<()>,
{
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .max_depth((max_depth > 0).then_some(max_depth));

    for entry in builder.build() {
        if let Some(stop) = token.error() {
            return Err(stop);
        }

        let event = match entry {
            Ok(entry) => {
                let Some(file_type) = entry.file_type() else {
                    // stdin only; never produced for a path root
                    continue;
                };
                let scannable = if file_type.is_symlink() {
                    link_is_scannable(entry.path())
                } else {
                    file_type.is_file()
                };
                if !scannable {
                    if !file_type.is_dir() {
                        trace!(path = %entry.path().display(), "Skipping special file");
                    }
                    continue;
                }
                WalkEvent::File(entry.into_path())
            }
            Err(err) => {
                let (path, error) = convert_error(err, root);
                WalkEvent::Error { path, error }
            }
        };
        visit(event)?;
    }
    Ok(())
}

fn link_is_scannable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(target) => target.is_file(),
        Err(_) => true,
    }
}

fn convert_error(err: ignore::Error, root: &Path) -> (PathBuf, FinderError) {
    let path = error_path(&err)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let error = match err.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::NotFound) => FinderError::file_not_found(&path),
        Some(io::ErrorKind::PermissionDenied) => FinderError::permission_denied(&path),
        _ => FinderError::IoError(io::Error::other(err.to_string())),
    };
    (path, error)
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child),
        ignore::Error::Partial(errs) => errs.first().and_then(error_path),
        _ => None,
    }
}

/// Default roots when none are given.
///
/// Windows: every existing drive `C:\` to `Z:\`. Elsewhere: `/` plus each
/// subdirectory of `/mnt`, `/media`, `/run/media` and `/Volumes`; missing
/// mount points are ignored.
pub fn detect_roots() -> Vec<PathBuf> {
    if cfg!(windows) {
        return ('C'..='Z')
            .map(|letter| PathBuf::from(format!("{letter}:\\")))
            .filter(|p| p.is_dir())
            .collect();
    }

    let mut roots = vec![PathBuf::from("/")];
    for mount in ["/mnt", "/media", "/run/media", "/Volumes"] {
        let Ok(entries) = std::fs::read_dir(mount) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        found.sort();
        roots.extend(found);
    }
    roots
}
