//! Archives as virtual file trees.
//!
//! An archive is expanded in two steps that may run on different threads:
//!
//! 1. [`expand`] lists the entries (producer side). Each qualifying entry
//!    is handed to a visitor which turns it into a scan task.
//! 2. [`with_entry`] reopens the archive and streams a single entry to a
//!    closure (worker side).
//!
//! Both steps own their file handle for exactly the duration of the call,
//! so the handle is released on every exit path: error, cancellation,
//! ceiling reached or normal completion.
//!
//! Tar-based formats have no index. Opening one entry re-reads the stream
//! up to that entry.
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::errors::{FinderError, FinderResult};
use crate::filters::ExtensionFilter;

/// Archive container kind, detected from the file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    /// Single gzip stream
    Gz,
    /// Single bzip2 stream
    Bz2,
    /// Single xz stream
    Xz,
    /// Single zstd stream
    Zst,
    /// Recognized as an archive but not readable (rar, 7z, brotli, lz4...)
    Unsupported,
}

const UNSUPPORTED_SUFFIXES: &[&str] = &[
    ".rar", ".7z", ".br", ".lz4", ".lz", ".mz", ".sz", ".s2", ".zz",
];

impl ArchiveFormat {
    /// Detects the format by file-name suffix (case-insensitive).
    ///
    /// Compound suffixes win over their last component, so `logs.tar.gz`
    /// is `TarGz` and not `Gz`.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        Self::detect_name(&name)
    }

    fn detect_name(name: &str) -> Option<Self> {
        let ends = |suffixes: &[&str]| suffixes.iter().any(|s| name.ends_with(s));

        let format = if ends(&[".tar.gz", ".tgz"]) {
            Self::TarGz
        } else if ends(&[".tar.bz2", ".tbz2", ".tbz"]) {
            Self::TarBz2
        } else if ends(&[".tar.xz", ".txz"]) {
            Self::TarXz
        } else if ends(&[".tar.zst", ".tzst"]) {
            Self::TarZst
        } else if ends(&[".tar"]) {
            Self::Tar
        } else if ends(&[".zip"]) {
            Self::Zip
        } else if ends(&[".gz"]) {
            Self::Gz
        } else if ends(&[".bz2"]) {
            Self::Bz2
        } else if ends(&[".xz"]) {
            Self::Xz
        } else if ends(&[".zst"]) {
            Self::Zst
        } else if ends(UNSUPPORTED_SUFFIXES) {
            Self::Unsupported
        } else {
            return None;
        };
        Some(format)
    }

    pub fn is_supported(self) -> bool {
        self != Self::Unsupported
    }

    fn is_tar(self) -> bool {
        matches!(
            self,
            Self::Tar | Self::TarGz | Self::TarBz2 | Self::TarXz | Self::TarZst
        )
    }

    fn is_single_stream(self) -> bool {
        matches!(self, Self::Gz | Self::Bz2 | Self::Xz | Self::Zst)
    }
}

/// How an archive expansion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// Every entry was listed
    Complete { entries: usize },
    /// The entry ceiling was hit; the first `entries` tasks stand
    Truncated { entries: usize },
    /// The cancellation token fired mid-listing
    Cancelled { entries: usize },
    /// The format is recognized but cannot be read
    Unsupported,
}

impl Expansion {
    /// Number of entries handed to the visitor
    pub fn entries(&self) -> usize {
        match *self {
            Self::Complete { entries }
            | Self::Truncated { entries }
            | Self::Cancelled { entries } => entries,
            Self::Unsupported => 0,
        }
    }
}

/// Lists the file entries of `archive` and feeds the ones passing `filter`
/// to `visit`.
///
/// At most `max_entries` entries are emitted. Once that many have been
/// emitted and another entry shows up, listing stops with a warning and
/// [`Expansion::Truncated`] is returned; this is not an error.
///
/// An `Err` from `visit` stops the listing and is returned as is. Failing
/// to open or decode the archive is an [`FinderError::Archive`].
pub fn expand<F>(
    archive: &Path,
    filter: &ExtensionFilter,
    max_entries: usize,
    token: &CancellationToken,
    mut visit: F,
) -> FinderResult<Expansion>
where
    F: FnMut(String) -> FinderResult<()>,
{
    let format = match ArchiveFormat::detect(archive) {
        Some(format) if format.is_supported() => format,
        _ => {
            warn!(archive = %archive.display(), "Skipping unsupported archive format");
            return Ok(Expansion::Unsupported);
        }
    };

    let mut emitted = 0usize;
    let mut truncated = false;
    let mut cancelled = false;
    let mut visit_error = None;

    for_each_entry(archive, format, |inner| {
        if token.is_cancelled() {
            cancelled = true;
            return ControlFlow::Break(());
        }
        if emitted >= max_entries {
            truncated = true;
            return ControlFlow::Break(());
        }
        if !filter.allows(Path::new(&inner)) {
            return ControlFlow::Continue(());
        }
        if let Err(e) = visit(inner) {
            visit_error = Some(e);
            return ControlFlow::Break(());
        }
        emitted += 1;
        ControlFlow::Continue(())
    })?;

    if let Some(e) = visit_error {
        return Err(e);
    }
    if cancelled {
        return Ok(Expansion::Cancelled { entries: emitted });
    }
    if truncated {
        warn!(
            archive = %archive.display(),
            limit = max_entries,
            "Archive skipped: too many files, possible zip bomb"
        );
        return Ok(Expansion::Truncated { entries: emitted });
    }
    debug!(archive = %archive.display(), entries = emitted, "Archive listed");
    Ok(Expansion::Complete { entries: emitted })
}

/// Opens one entry of `archive` and passes it to `f` as a reader.
///
/// The archive handle lives only for the duration of the call.
pub fn with_entry<R, F>(archive: &Path, inner: &str, f: F) -> FinderResult<R>
where
    F: FnOnce(&mut dyn Read) -> FinderResult<R>,
{
    let format = ArchiveFormat::detect(archive)
        .filter(|format| format.is_supported())
        .ok_or_else(|| FinderError::archive(archive, "unsupported archive format"))?;

    let not_found = || FinderError::archive(archive, format!("entry not found: {inner}"));

    if format == ArchiveFormat::Zip {
        let mut zip = open_zip(archive)?;
        let mut entry = zip.by_name(inner).map_err(|_| not_found())?;
        return f(&mut entry);
    }

    if format.is_single_stream() {
        if single_stream_name(archive) != inner {
            return Err(not_found());
        }
        let mut reader = decoder(archive, format)?;
        return f(&mut *reader);
    }

    let mut tar = tar::Archive::new(decoder(archive, format)?);
    let entries = tar.entries().map_err(|e| FinderError::archive(archive, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| FinderError::archive(archive, e))?;
        let is_target = entry
            .path()
            .map(|p| p.to_string_lossy() == inner)
            .map_err(|e| FinderError::archive(archive, e))?;
        if is_target {
            return f(&mut entry);
        }
    }
    Err(not_found())
}

/// Calls `f` with the name of every non-directory entry until it breaks.
fn for_each_entry<F>(archive: &Path, format: ArchiveFormat, mut f: F) -> FinderResult<()>
where
    F: FnMut(String) -> ControlFlow<()>,
{
    if format == ArchiveFormat::Zip {
        let mut zip = open_zip(archive)?;
        for i in 0..zip.len() {
            let name = {
                let entry = zip
                    .by_index_raw(i)
                    .map_err(|e| FinderError::archive(archive, e))?;
                if entry.is_dir() {
                    continue;
                }
                entry.name().to_string()
            };
            if f(name).is_break() {
                break;
            }
        }
        return Ok(());
    }

    if format.is_single_stream() {
        // Probe the stream so a corrupt file fails here, not in a worker.
        let mut reader = decoder(archive, format)?;
        reader
            .read(&mut [0u8; 1])
            .map_err(|e| FinderError::archive(archive, e))?;
        let _ = f(single_stream_name(archive));
        return Ok(());
    }

    debug_assert!(format.is_tar());
    let mut tar = tar::Archive::new(decoder(archive, format)?);
    let entries = tar.entries().map_err(|e| FinderError::archive(archive, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FinderError::archive(archive, e))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| FinderError::archive(archive, e))?
            .to_string_lossy()
            .into_owned();
        if f(name).is_break() {
            break;
        }
    }
    Ok(())
}

fn open_zip(archive: &Path) -> FinderResult<zip::ZipArchive<BufReader<File>>> {
    let file = File::open(archive).map_err(|e| FinderError::from_io(archive, e))?;
    zip::ZipArchive::new(BufReader::new(file)).map_err(|e| FinderError::archive(archive, e))
}

/// Decompressing reader over the whole file (tar stream or single stream).
fn decoder(archive: &Path, format: ArchiveFormat) -> FinderResult<Box<dyn Read>> {
    let file = File::open(archive).map_err(|e| FinderError::from_io(archive, e))?;
    let file = BufReader::new(file);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz | ArchiveFormat::Gz => {
            Box::new(flate2::read::MultiGzDecoder::new(file))
        }
        ArchiveFormat::TarBz2 | ArchiveFormat::Bz2 => {
            Box::new(bzip2::read::MultiBzDecoder::new(file))
        }
        ArchiveFormat::TarXz | ArchiveFormat::Xz => {
            Box::new(xz2::read::XzDecoder::new_multi_decoder(file))
        }
        ArchiveFormat::TarZst | ArchiveFormat::Zst => Box::new(
            zstd::stream::read::Decoder::with_buffer(file)
                .map_err(|e| FinderError::archive(archive, e))?,
        ),
        ArchiveFormat::Zip | ArchiveFormat::Unsupported => {
            return Err(FinderError::archive(
                archive,
                io::Error::new(io::ErrorKind::Unsupported, "not a stream format"),
            ))
        }
    };
    Ok(reader)
}

/// Entry name of a single-stream archive: the file name minus its last
/// extension (`notes.txt.gz` holds `notes.txt`).
fn single_stream_name(archive: &Path) -> String {
    archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zw = zip::ZipWriter::new(File::create(path).unwrap());
        let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zw.add_directory("dir/", opts).unwrap();
        for (name, body) in entries {
            zw.start_file(*name, opts).unwrap();
            zw.write_all(body.as_bytes()).unwrap();
        }
        zw.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, body) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn list(archive: &Path, filter: &ExtensionFilter, max: usize) -> (Expansion, Vec<String>) {
        let mut seen = Vec::new();
        let outcome = expand(archive, filter, max, &CancellationToken::new(), |inner| {
            seen.push(inner);
            Ok(())
        })
        .unwrap();
        (outcome, seen)
    }

    fn read_entry(archive: &Path, inner: &str) -> String {
        with_entry(archive, inner, |r| {
            let mut s = String::new();
            r.read_to_string(&mut s)?;
            Ok(s)
        })
        .unwrap()
    }

    #[test]
    fn test_detect_formats() {
        let cases = [
            ("a.zip", ArchiveFormat::Zip),
            ("a.tar", ArchiveFormat::Tar),
            ("a.tar.gz", ArchiveFormat::TarGz),
            ("A.TGZ", ArchiveFormat::TarGz),
            ("a.tar.bz2", ArchiveFormat::TarBz2),
            ("a.txz", ArchiveFormat::TarXz),
            ("a.tar.zst", ArchiveFormat::TarZst),
            ("a.log.gz", ArchiveFormat::Gz),
            ("a.bz2", ArchiveFormat::Bz2),
            ("a.xz", ArchiveFormat::Xz),
            ("a.zst", ArchiveFormat::Zst),
            ("a.rar", ArchiveFormat::Unsupported),
            ("a.7z", ArchiveFormat::Unsupported),
            ("a.lz4", ArchiveFormat::Unsupported),
        ];
        for (name, expected) in cases {
            assert_eq!(ArchiveFormat::detect(Path::new(name)), Some(expected), "{name}");
        }
        assert_eq!(ArchiveFormat::detect(Path::new("a.txt")), None);
        assert_eq!(ArchiveFormat::detect(Path::new("tarball")), None);
    }

    #[test]
    fn test_zip_listing_and_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.zip");
        write_zip(&path, &[("dir/a.txt", "foo\n"), ("b.log", "bar1\n")]);

        let (outcome, mut seen) = list(&path, &ExtensionFilter::default(), 100);
        seen.sort();
        assert_eq!(outcome, Expansion::Complete { entries: 2 });
        assert_eq!(seen, vec!["b.log", "dir/a.txt"]);
        assert_eq!(read_entry(&path, "dir/a.txt"), "foo\n");
    }

    #[test]
    fn test_tar_gz_listing_and_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.tar.gz");
        write_tar_gz(&path, &[("app/server.log", "error 42\n"), ("notes.md", "hi\n")]);

        let (outcome, seen) = list(&path, &ExtensionFilter::default(), 100);
        assert_eq!(outcome.entries(), 2);
        assert_eq!(seen, vec!["app/server.log", "notes.md"]);
        assert_eq!(read_entry(&path, "notes.md"), "hi\n");
    }

    #[test]
    fn test_single_gzip_stream() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"line one\nline two\n").unwrap();
        enc.finish().unwrap();

        let (outcome, seen) = list(&path, &ExtensionFilter::default(), 100);
        assert_eq!(outcome, Expansion::Complete { entries: 1 });
        assert_eq!(seen, vec!["notes.txt"]);
        assert_eq!(read_entry(&path, "notes.txt"), "line one\nline two\n");
    }

    #[test]
    fn test_filter_applies_to_inner_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.zip");
        write_zip(&path, &[("a.txt", "x"), ("b.bin", "y"), ("c/d.TXT", "z")]);

        let filter = ExtensionFilter::new(["txt"], ["txt"]);
        let (_, mut seen) = list(&path, &filter, 100);
        seen.sort();
        assert_eq!(seen, vec!["a.txt", "c/d.TXT"]);
    }

    #[test]
    fn test_entry_ceiling_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bomb.zip");
        let names: Vec<String> = (0..25).map(|i| format!("f{i}.txt")).collect();
        let entries: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();
        write_zip(&path, &entries);

        let (outcome, seen) = list(&path, &ExtensionFilter::default(), 10);
        assert_eq!(outcome, Expansion::Truncated { entries: 10 });
        assert_eq!(seen.len(), 10);

        // Exactly at the ceiling is not a truncation.
        let (outcome, _) = list(&path, &ExtensionFilter::default(), 25);
        assert_eq!(outcome, Expansion::Complete { entries: 25 });
    }

    #[test]
    fn test_unsupported_format_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.rar");
        std::fs::write(&path, b"Rar!\x1a\x07\x00").unwrap();

        let (outcome, seen) = list(&path, &ExtensionFilter::default(), 100);
        assert_eq!(outcome, Expansion::Unsupported);
        assert!(seen.is_empty());
        assert!(with_entry(&path, "x", |_| Ok(())).is_err());
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"definitely not a zip").unwrap();

        let result = expand(&path, &ExtensionFilter::default(), 100, &CancellationToken::new(), |_| Ok(()));
        assert!(matches!(result, Err(FinderError::Archive { .. })));
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.zip");
        write_zip(&path, &[("a.txt", "x")]);
        let result = with_entry(&path, "nope.txt", |_| Ok(()));
        assert!(matches!(result, Err(FinderError::Archive { .. })));
    }

    #[test]
    fn test_cancelled_token_stops_listing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.zip");
        write_zip(&path, &[("a.txt", "x"), ("b.txt", "y")]);

        let token = CancellationToken::new();
        token.cancel();
        let mut visits = 0;
        let outcome = expand(&path, &ExtensionFilter::default(), 100, &token, |_| {
            visits += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(outcome, Expansion::Cancelled { entries: 0 });
        assert_eq!(visits, 0);
    }

    #[test]
    fn test_visitor_error_stops_listing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs.zip");
        write_zip(&path, &[("a.txt", "x"), ("b.txt", "y")]);

        let mut visits = 0;
        let result = expand(&path, &ExtensionFilter::default(), 100, &CancellationToken::new(), |_| {
            visits += 1;
            Err(FinderError::PoolClosed)
        });
        assert!(matches!(result, Err(FinderError::PoolClosed)));
        assert_eq!(visits, 1);
    }
}
