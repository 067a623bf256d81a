//! Write completion tracking.
//!
//! Every admitted write request carries a completion cell shared between
//! the writer lane (which resolves it exactly once) and the caller (which
//! may await it, poll it, or cancel it). Lifecycle:
//!
//! ```text
//! Pending --(drain loop picks up)--> Writing --(write done)--> Done
//!    │
//!    └--(caller cancels)--> Done(Cancelled)
//! ```
//!
//! Cancellation only succeeds while the request is `Pending`; once the
//! writer has started, the write runs to completion. After resolution the
//! result is readable any number of times from any clone of the future.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::error::{Result, SendError, SendErrorKind};

/// Outcome of one write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    outcome: Outcome,
    bytes_written: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure(SendErrorKind),
}

impl WriteResult {
    /// A successful write of `bytes_written` wire bytes.
    pub fn success(bytes_written: usize) -> Self {
        Self {
            outcome: Outcome::Success,
            bytes_written,
        }
    }

    /// A failed write. `bytes_written` counts bytes flushed before the
    /// fault (zero for requests that never started).
    pub fn failure(kind: SendErrorKind, bytes_written: usize) -> Self {
        Self {
            outcome: Outcome::Failure(kind),
            bytes_written,
        }
    }

    /// Whether the write completed successfully.
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    /// The failure kind, if any.
    #[inline]
    pub fn error_kind(&self) -> Option<SendErrorKind> {
        match self.outcome {
            Outcome::Success => None,
            Outcome::Failure(kind) => Some(kind),
        }
    }

    /// Wire bytes written (header + payload across all frames).
    #[inline]
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Convert into a `Result`, as blocking operations surface it.
    pub fn into_result(self) -> Result<usize> {
        match self.outcome {
            Outcome::Success => Ok(self.bytes_written),
            Outcome::Failure(kind) => Err(SendError::from(kind)),
        }
    }
}

/// Completion phase, guarded by the cell mutex.
#[derive(Debug)]
enum Phase {
    /// Admitted, write not started. Cancellable.
    Pending,
    /// The writer lane is writing this request's frames.
    Writing,
    /// Resolved. Terminal.
    Done(WriteResult),
}

#[derive(Debug)]
struct Cell {
    phase: Mutex<Phase>,
    notify: Notify,
}

/// Create a linked completion pair for one write request.
pub fn completion_pair() -> (CompletionHandle, CompletionFuture) {
    let cell = Arc::new(Cell {
        phase: Mutex::new(Phase::Pending),
        notify: Notify::new(),
    });
    (
        CompletionHandle { cell: cell.clone() },
        CompletionFuture { cell },
    )
}

/// Writer-side handle: marks the write started and resolves the result.
#[derive(Debug)]
pub struct CompletionHandle {
    cell: Arc<Cell>,
}

impl CompletionHandle {
    /// Transition `Pending -> Writing`.
    ///
    /// Returns `false` if the request was already resolved (cancelled
    /// before the writer reached it); the writer must skip it.
    pub fn begin_writing(&self) -> bool {
        let mut phase = self.cell.phase.lock().unwrap();
        match *phase {
            Phase::Pending => {
                *phase = Phase::Writing;
                true
            }
            Phase::Writing => true,
            Phase::Done(_) => false,
        }
    }

    /// Resolve the request. A no-op if already resolved.
    pub fn resolve(&self, result: WriteResult) {
        let mut phase = self.cell.phase.lock().unwrap();
        if matches!(*phase, Phase::Done(_)) {
            return;
        }
        *phase = Phase::Done(result);
        drop(phase);
        self.cell.notify.notify_waiters();
    }
}

/// Caller-side handle: await, poll, or cancel one write request.
///
/// Clones observe the same request. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CompletionFuture {
    cell: Arc<Cell>,
}

impl CompletionFuture {
    /// Wait until the request resolves.
    pub async fn wait(&self) -> WriteResult {
        loop {
            let notified = self.cell.notify.notified();
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }

    /// The result, if already resolved.
    pub fn try_result(&self) -> Option<WriteResult> {
        match *self.cell.phase.lock().unwrap() {
            Phase::Done(result) => Some(result),
            _ => None,
        }
    }

    /// Whether the request has resolved.
    pub fn is_done(&self) -> bool {
        self.try_result().is_some()
    }

    /// Cancel the request if its write has not started.
    ///
    /// Returns `true` and resolves the request with a `Cancelled` result
    /// if it was still pending. Returns `false` once writing has begun or
    /// the request already resolved; the outcome is then whatever the
    /// writer produces.
    pub fn cancel(&self) -> bool {
        let mut phase = self.cell.phase.lock().unwrap();
        match *phase {
            Phase::Pending => {
                *phase = Phase::Done(WriteResult::failure(SendErrorKind::Cancelled, 0));
                drop(phase);
                self.cell.notify.notify_waiters();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_result_success() {
        let result = WriteResult::success(42);
        assert!(result.is_success());
        assert_eq!(result.bytes_written(), 42);
        assert_eq!(result.error_kind(), None);
        assert_eq!(result.into_result().unwrap(), 42);
    }

    #[test]
    fn test_write_result_failure() {
        let result = WriteResult::failure(SendErrorKind::Timeout, 10);
        assert!(!result.is_success());
        assert_eq!(result.error_kind(), Some(SendErrorKind::Timeout));
        assert!(matches!(result.into_result(), Err(SendError::Timeout)));
    }

    #[tokio::test]
    async fn test_resolve_then_wait() {
        let (handle, future) = completion_pair();
        assert!(!future.is_done());

        handle.resolve(WriteResult::success(7));
        assert_eq!(future.wait().await, WriteResult::success(7));
    }

    #[tokio::test]
    async fn test_wait_before_resolve() {
        let (handle, future) = completion_pair();

        let waiter = tokio::spawn(async move { future.wait().await });
        tokio::task::yield_now().await;

        handle.resolve(WriteResult::success(3));
        assert_eq!(waiter.await.unwrap(), WriteResult::success(3));
    }

    #[tokio::test]
    async fn test_result_readable_many_times() {
        let (handle, future) = completion_pair();
        handle.resolve(WriteResult::success(5));

        assert_eq!(future.wait().await, WriteResult::success(5));
        assert_eq!(future.wait().await, WriteResult::success(5));
        assert_eq!(future.try_result(), Some(WriteResult::success(5)));

        let clone = future.clone();
        assert_eq!(clone.wait().await, WriteResult::success(5));
    }

    #[test]
    fn test_resolve_only_once() {
        let (handle, future) = completion_pair();
        handle.resolve(WriteResult::success(1));
        handle.resolve(WriteResult::failure(SendErrorKind::Io, 0));

        assert_eq!(future.try_result(), Some(WriteResult::success(1)));
    }

    #[test]
    fn test_cancel_while_pending() {
        let (handle, future) = completion_pair();
        assert!(future.cancel());

        let result = future.try_result().unwrap();
        assert_eq!(result.error_kind(), Some(SendErrorKind::Cancelled));

        // The writer skips a cancelled request.
        assert!(!handle.begin_writing());
    }

    #[test]
    fn test_cancel_after_writing_started() {
        let (handle, future) = completion_pair();
        assert!(handle.begin_writing());

        assert!(!future.cancel());
        assert!(!future.is_done());

        handle.resolve(WriteResult::success(9));
        assert_eq!(future.try_result(), Some(WriteResult::success(9)));
    }

    #[test]
    fn test_cancel_after_done() {
        let (handle, future) = completion_pair();
        handle.resolve(WriteResult::success(2));
        assert!(!future.cancel());
        assert_eq!(future.try_result(), Some(WriteResult::success(2)));
    }
}
