//! Cooperative cancellation shared by every scan stage.
//!
//! A [`CancellationToken`] is a cheap, cloneable handle. Producers and
//! workers poll [`CancellationToken::is_cancelled`] between blocking
//! operations; the scan controller additionally blocks on
//! [`CancellationToken::done`] inside a `select!`, which becomes ready the
//! moment the token is cancelled (the underlying sender is dropped).
//!
//! Tokens may carry a deadline. An expired deadline reads as cancelled
//! with [`CancelReason::DeadlineExceeded`].
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use crate::errors::FinderError;

/// Why a token was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called (signal, caller, parent token)
    Requested,
    /// The token's deadline passed
    DeadlineExceeded,
}

impl CancelReason {
    pub fn into_error(self) -> FinderError {
        match self {
            CancelReason::Requested => FinderError::Cancelled,
            CancelReason::DeadlineExceeded => FinderError::DeadlineExceeded,
        }
    }
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    reason: OnceLock<CancelReason>,
    deadline: Option<Instant>,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    children: Mutex<Vec<CancellationToken>>,
}

/// Cloneable cancellation handle
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A token that is only cancelled explicitly
    pub fn new() -> Self {
        Self::with_deadline_opt(None)
    }

    /// A token that cancels itself once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline_opt(Instant::now().checked_add(timeout))
    }

    fn with_deadline_opt(deadline: Option<Instant>) -> Self {
        // Nothing is ever sent; dropping the sender disconnects `done_rx`.
        let (done_tx, done_rx) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: OnceLock::new(),
                deadline,
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a token that is cancelled whenever this one is, but can also
    /// be cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        let child = Self::with_deadline_opt(self.inner.deadline);
        self.inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child.clone());
        // The parent may have been cancelled while we registered.
        if let Some(reason) = self.reason() {
            child.cancel_with(reason);
        }
        child
    }

    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Requested);
    }

    pub fn cancel_with(&self, reason: CancelReason) {
        // The reason is visible before the flag; the first caller's wins.
        let _ = self.inner.reason.set(reason);
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = self.inner.reason.get().copied().unwrap_or(reason);
        self.inner
            .done_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let children = std::mem::take(
            &mut *self
                .inner
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for child in children {
            child.cancel_with(reason);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return true;
        }
        if self.deadline_passed() {
            self.cancel_with(CancelReason::DeadlineExceeded);
            return true;
        }
        false
    }

    /// The reason, once cancelled
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_cancelled() {
            Some(
                self.inner
                    .reason
                    .get()
                    .copied()
                    .unwrap_or(CancelReason::Requested),
            )
        } else {
            None
        }
    }

    /// The stop error matching [`Self::reason`]
    pub fn error(&self) -> Option<FinderError> {
        self.reason().map(CancelReason::into_error)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Receiver that becomes disconnected once the token is cancelled.
    ///
    /// Use in `select!` as `recv(token.done()) -> _ => ...`.
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }

    /// Receiver that fires at the deadline; never fires without one.
    pub fn deadline_signal(&self) -> Receiver<Instant> {
        match self.inner.deadline {
            Some(deadline) => channel::at(deadline),
            None => channel::never(),
        }
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::select;
    use std::thread;

    #[test]
    fn test_cancel_sets_reason_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        token.cancel();
        token.cancel_with(CancelReason::DeadlineExceeded);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::Requested));
        assert!(matches!(token.error(), Some(FinderError::Cancelled)));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_done_wakes_select() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let woke = select! {
            recv(token.done()) -> _ => true,
            default(Duration::from_secs(5)) => false,
        };
        handle.join().unwrap();
        assert!(woke);
    }

    #[test]
    fn test_timeout_expires() {
        let token = CancellationToken::with_timeout(Duration::from_millis(10));
        assert!(token.deadline().is_some());
        thread::sleep(Duration::from_millis(30));
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
        assert!(matches!(token.error(), Some(FinderError::DeadlineExceeded)));
    }

    #[test]
    fn test_expired_deadline_reads_as_deadline_from_every_thread() {
        for _ in 0..50 {
            let token = CancellationToken::with_timeout(Duration::ZERO);
            thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
                    });
                }
            });
        }
    }

    #[test]
    fn test_child_follows_parent_but_not_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());

        parent.cancel();
        assert!(sibling.is_cancelled());
        assert_eq!(sibling.reason(), Some(CancelReason::Requested));
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        let child = parent.child();
        assert!(child.is_cancelled());
    }
}
