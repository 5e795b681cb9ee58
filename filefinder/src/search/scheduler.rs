//! Task queue and worker pool.
//!
//! Producers (one walker per root) push [`ScanTask`]s into a bounded queue.
//! A full queue blocks the producer, which is the only backpressure in the
//! system: traversal runs at the speed of content scanning instead of
//! buffering unbounded metadata.
//!
//! The scan controller pulls from the queue and hands each task to a
//! [`WorkerPool`]. Every dispatched task carries a clone of the pool's
//! [`WaitGroup`], so [`WorkerPool::wait`] returns once all submitted work is
//! done.
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use crossbeam::sync::WaitGroup;
use crossbeam::thread::Scope;
use std::path::PathBuf;
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::errors::{FinderError, FinderResult};

/// One unit of work: a file, or one entry inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    /// File on disk; the archive itself for archive entries
    pub path: PathBuf,
    /// Entry path inside the archive
    pub inner_path: Option<String>,
    pub from_archive: bool,
}

impl ScanTask {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner_path: None,
            from_archive: false,
        }
    }

    pub fn archive_entry(archive: impl Into<PathBuf>, inner: impl Into<String>) -> Self {
        Self {
            path: archive.into(),
            inner_path: Some(inner.into()),
            from_archive: true,
        }
    }
}

/// Creates the bounded task queue.
pub fn task_queue(
    capacity: usize,
    token: &CancellationToken,
) -> (TaskSender, Receiver<ScanTask>) {
    let (tx, rx) = channel::bounded(capacity);
    (
        TaskSender {
            tx,
            token: token.clone(),
        },
        rx,
    )
}

/// Producer end of the task queue.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: Sender<ScanTask>,
    token: CancellationToken,
}

impl TaskSender {
    /// Pushes a task, blocking while the queue is full.
    ///
    /// Returns the token's stop error if it fires while waiting and
    /// [`FinderError::PoolClosed`] if the consumer side is gone.
    pub fn push(&self, task: ScanTask) -> FinderResult<()> {
        send_or_stop(&self.tx, task, &self.token)
    }
}

type Job = (ScanTask, WaitGroup);

/// Fixed-size pool of scoped worker threads.
pub struct WorkerPool {
    jobs: Sender<Job>,
    pending: WaitGroup,
    workers: usize,
}

impl WorkerPool {
    /// Spawns `workers` threads inside `scope`, each running `handler` on
    /// the tasks it receives.
    pub fn start<'env, F>(
        scope: &Scope<'env>,
        workers: usize,
        handler: &'env F,
    ) -> FinderResult<Self>
    where
        F: Fn(ScanTask) + Sync,
    {
        let workers = workers.max(1);
        let (jobs, rx) = channel::bounded::<Job>(workers);

        for id in 0..workers {
            let rx = rx.clone();
            scope
                .builder()
                .name(format!("ff-worker-{id}"))
                .spawn(move |_| {
                    for (task, done) in rx.iter() {
                        handler(task);
                        drop(done);
                    }
                    trace!(worker = id, "Worker exiting");
                })
                .map_err(FinderError::WorkerSpawn)?;
        }

        Ok(Self {
            jobs,
            pending: WaitGroup::new(),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Hands a task to the next free worker.
    ///
    /// Blocks while every worker is busy; gives up with the token's stop
    /// error on cancellation and with [`FinderError::PoolClosed`] when no
    /// worker is left to receive it.
    pub fn submit(&self, task: ScanTask, token: &CancellationToken) -> FinderResult<()> {
        send_or_stop(&self.jobs, (task, self.pending.clone()), token)
    }

    /// Closes the pool and blocks until every submitted task has finished.
    pub fn wait(self) {
        let Self { jobs, pending, .. } = self;
        drop(jobs);
        pending.wait();
    }
}

fn send_or_stop<T>(tx: &Sender<T>, item: T, token: &CancellationToken) -> FinderResult<()> {
    if let Some(stop) = token.error() {
        return Err(stop);
    }
    let deadline = token.deadline_signal();
    select! {
        send(tx, item) -> res => res.map_err(|_| FinderError::PoolClosed),
        recv(token.done()) -> _ => Err(stop_error(token)),
        recv(deadline) -> _ => Err(stop_error(token)),
    }
}

fn stop_error(token: &CancellationToken) -> FinderError {
    token.error().unwrap_or(FinderError::Cancelled)
}
