use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::trace;

use super::archive;
use super::matcher::PatternSet;
use super::scheduler::ScanTask;
use crate::cancel::CancellationToken;
use crate::errors::{FinderError, FinderResult};
use crate::filters::flatten_path;
use crate::results::MatchResult;

const BUFFER_CAPACITY: usize = 65536;
/// Longest line handed to the matcher; longer runs are split
pub const MAX_LINE_BYTES: usize = 1 << 20;
const TEMP_PREFIX: &str = "ff-";

/// Streams file content through the pattern set.
///
/// In line mode every matching line is reported. In save-full mode the
/// content is teed into a temp file inside the destination folder; on the
/// first match the temp file is synced and renamed to its final name,
/// otherwise it is deleted. Either way the file is never held in memory.
#[derive(Debug, Clone, Copy)]
pub struct ContentScanner<'a> {
    patterns: &'a PatternSet,
    save_full_folder: Option<&'a Path>,
}

impl<'a> ContentScanner<'a> {
    pub fn new(patterns: &'a PatternSet, save_full_folder: Option<&'a Path>) -> Self {
        Self {
            patterns,
            save_full_folder,
        }
    }

    /// Opens the task's file (or archive entry) and scans it.
    ///
    /// Any failure is reported through `emit` as one error result for this
    /// file; cancellation is silent.
    pub fn scan_task<F>(&self, task: &ScanTask, token: &CancellationToken, mut emit: F)
    where
        F: FnMut(MatchResult),
    {
        let inner = task.inner_path.as_deref();
        let outcome = match inner {
            Some(inner) => archive::with_entry(&task.path, inner, |reader| {
                self.scan(reader, &task.path, Some(inner), token, &mut emit)
            }),
            None => File::open(&task.path)
                .map_err(|e| FinderError::from_io(&task.path, e))
                .and_then(|file| self.scan(file, &task.path, None, token, &mut emit)),
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_cancellation() => {
                trace!(file = %task.path.display(), "Scan interrupted");
            }
            Err(e) => emit(MatchResult::failure(
                task.path.clone(),
                task.inner_path.clone(),
                e,
            )),
        }
    }

    /// Scans one stream in the configured mode.
    pub fn scan<R, F>(
        &self,
        reader: R,
        file: &Path,
        inner: Option<&str>,
        token: &CancellationToken,
        emit: &mut F,
    ) -> FinderResult<()>
    where
        R: Read,
        F: FnMut(MatchResult),
    {
        match self.save_full_folder {
            Some(folder) => self.scan_to_disk(reader, folder, file, inner, token, emit),
            None => self.scan_lines(reader, file, inner, token, emit),
        }
    }

    fn scan_lines<R, F>(
        &self,
        reader: R,
        file: &Path,
        inner: Option<&str>,
        token: &CancellationToken,
        emit: &mut F,
    ) -> FinderResult<()>
    where
        R: Read,
        F: FnMut(MatchResult),
    {
        let mut lines = LineReader::new(reader);
        let mut folded = String::new();

        while let Some((number, line)) = lines.next_line(token)? {
            if let Some(pattern) = self.patterns.first_match(&line, &mut folded) {
                emit(MatchResult::line_match(
                    file,
                    inner.map(str::to_string),
                    number,
                    line,
                    pattern.describe(),
                ));
            }
        }
        Ok(())
    }

    fn scan_to_disk<R, F>(
        &self,
        reader: R,
        folder: &Path,
        file: &Path,
        inner: Option<&str>,
        token: &CancellationToken,
        emit: &mut F,
    ) -> FinderResult<()>
    where
        R: Read,
        F: FnMut(MatchResult),
    {
        fs::create_dir_all(folder)?;
        // Deleted on drop unless persisted below.
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(folder)?;

        let matched = {
            let tee = TeeReader::new(reader, temp.as_file_mut());
            let mut lines = LineReader::new(tee);
            let mut folded = String::new();
            let mut matched = None;

            while let Some((_, line)) = lines.next_line(token)? {
                if let Some(pattern) = self.patterns.first_match(&line, &mut folded) {
                    matched = Some(pattern.describe());
                    break;
                }
            }
            if matched.is_some() {
                // The copy must be complete before it becomes visible.
                lines.drain(token)?;
            }
            matched
        };

        let Some(pattern) = matched else {
            return Ok(());
        };

        temp.as_file().sync_all()?;
        let dest = save_full_path(folder, file, inner);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        temp.persist(&dest).map_err(|e| FinderError::IoError(e.error))?;
        trace!(file = %file.display(), dest = %dest.display(), "Saved full file");

        emit(MatchResult::saved_file(
            file,
            inner.map(str::to_string),
            pattern,
        ));
        Ok(())
    }
}

/// Destination of a save-full copy: `<folder>/<flattened file>` or
/// `<folder>/<flattened archive>/<flattened entry>`.
pub fn save_full_path(folder: &Path, file: &Path, inner: Option<&str>) -> PathBuf {
    let base = folder.join(flatten_path(&file.to_string_lossy()));
    match inner {
        Some(inner) => base.join(flatten_path(inner)),
        None => base,
    }
}

/// Buffered line splitter with 1-based numbering.
///
/// Memory stays bounded by [`MAX_LINE_BYTES`]: a longer run without a
/// newline is handed out in pieces, each counted as its own line. The token
/// is checked before every buffer fill, so a stream that never ends still
/// stops once cancelled.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    number: usize,
}

impl<R: Read> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_CAPACITY, reader),
            buf: Vec::new(),
            number: 0,
        }
    }

    /// Next line without its terminator, decoded lossily.
    fn next_line(&mut self, token: &CancellationToken) -> FinderResult<Option<(usize, String)>> {
        self.buf.clear();
        loop {
            if let Some(stop) = token.error() {
                return Err(stop);
            }
            let chunk = match self.reader.fill_buf() {
                Ok(chunk) => chunk,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if chunk.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                break;
            }

            let room = MAX_LINE_BYTES - self.buf.len();
            let window = &chunk[..chunk.len().min(room)];
            let (taken, complete) = match window.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (window.len(), false),
            };
            self.buf.extend_from_slice(&window[..taken]);
            self.reader.consume(taken);
            if complete || self.buf.len() >= MAX_LINE_BYTES {
                break;
            }
        }

        self.number += 1;
        let line = strip_terminator(&self.buf);
        Ok(Some((self.number, String::from_utf8_lossy(line).into_owned())))
    }

    /// Reads the rest of the stream, discarding it.
    fn drain(&mut self, token: &CancellationToken) -> FinderResult<()> {
        loop {
            if let Some(stop) = token.error() {
                return Err(stop);
            }
            let len = match self.reader.fill_buf() {
                Ok(chunk) => chunk.len(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if len == 0 {
                return Ok(());
            }
            self.reader.consume(len);
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Copies everything read from `reader` into `writer`.
struct TeeReader<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> TeeReader<R, W> {
    fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl<R: Read, W: Write> Read for TeeReader<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.writer.write_all(&buf[..n])?;
        Ok(n)
    }
}
