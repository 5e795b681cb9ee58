/// The scanning pipeline.
///
/// # Data Flow
///
/// ```text
///  walker ──┐                                   ┌─> worker ─┐
///  walker ──┼─> bounded queue ─> controller ────┼─> worker ─┼─> on_match
///  archive ─┘   (backpressure)   (select! loop) └─> worker ─┘
/// ```
///
/// Data moves strictly left to right. Cancellation moves the other way:
/// every stage holds a clone of one [`CancellationToken`](crate::cancel::CancellationToken)
/// and stops initiating work once it fires.
///
/// # Components
///
/// 1. **Pattern engine** ([`matcher`]): a closed enum over regex, plain and
///    case-insensitive plain patterns. Pure, no I/O.
/// 2. **Walker** ([`walker`]): depth-bounded traversal built on the `ignore`
///    crate's walker, with every filter turned off.
/// 3. **Archive adapter** ([`archive`]): zip and tar families listed as
///    virtual trees, with an entry ceiling as a zip-bomb guard.
/// 4. **Scheduler** ([`scheduler`]): bounded crossbeam queue and a fixed
///    pool of scoped worker threads tracked by a wait group.
/// 5. **Content scanner** ([`processor`]): buffered line matching and the
///    tee-to-temp-then-rename protocol for saving whole files.
/// 6. **Controller** ([`engine`]): owns the scan lifecycle and decides how
///    it ends.
///
/// # Memory
///
/// Nothing grows with the size of the tree. The queue is bounded, files are
/// streamed through a 64 KiB buffer, and saved files go straight to disk:
/// ```rust,ignore
/// let tee = TeeReader::new(file, temp.as_file_mut());
/// let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, tee);
/// ```
pub mod archive;
pub mod engine;
pub mod matcher;
pub mod processor;
pub mod scheduler;
pub mod walker;

pub use archive::{ArchiveFormat, Expansion};
pub use engine::{scan, Scanner};
pub use matcher::{load_patterns, Pattern, PatternSet};
pub use processor::{save_full_path, ContentScanner};
pub use scheduler::{ScanTask, TaskSender, WorkerPool};
pub use walker::{detect_roots, walk, WalkEvent};
