//! Backpressure handling for the outbound queue.
//!
//! Producers must reserve a slot here before a write request is admitted,
//! which bounds how many requests can sit between admission and completion
//! when producers outrun the transport. Slots are request-granular: one
//! reservation per admitted request, released when the request resolves.
//!
//! # Configuration
//!
//! - `max_pending`: maximum admitted-but-unresolved requests (default: 1024)
//! - Timeout: how long a producer waits for a free slot (default: 5s)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, SendError};

/// Default maximum pending requests before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default backpressure timeout (how long to wait for a slot).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between backpressure checks while waiting.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// Backpressure controller for the outbound request queue.
///
/// Uses atomic operations for lock-free tracking of the pending request
/// count. Clones share the same counter and can live on any task.
#[derive(Debug)]
pub struct BackpressureController {
    /// Currently admitted, not yet resolved requests.
    pending: Arc<AtomicUsize>,
    /// Maximum allowed pending requests.
    max_pending: usize,
    /// Timeout for waiting on a slot.
    timeout: Duration,
}

impl BackpressureController {
    /// Create a new controller with the specified limit.
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a controller with a custom wait timeout.
    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending,
            timeout,
        }
    }

    /// Check if a request could be admitted without waiting.
    #[inline]
    pub fn can_accept(&self) -> bool {
        self.pending.load(Ordering::Acquire) < self.max_pending
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Current pending request count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Maximum pending limit.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Remaining admission capacity.
    #[inline]
    pub fn available_capacity(&self) -> usize {
        let current = self.pending.load(Ordering::Acquire);
        self.max_pending.saturating_sub(current)
    }

    /// Try to reserve a slot without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` if at capacity.
    pub fn try_reserve(&self) -> Result<()> {
        let current = self.pending.load(Ordering::Acquire);
        if current >= self.max_pending {
            return Err(SendError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Reserve a slot, waiting if necessary.
    ///
    /// Returns `Err(BackpressureTimeout)` if the timeout is reached.
    pub async fn reserve(&self) -> Result<()> {
        // Fast path: try immediate reservation
        if self.pending.load(Ordering::Acquire) < self.max_pending {
            self.pending.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        self.wait_and_reserve().await
    }

    /// Wait for a slot to free up, then reserve it.
    async fn wait_and_reserve(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            let current = self.pending.load(Ordering::Acquire);
            if current < self.max_pending {
                self.pending.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(SendError::BackpressureTimeout);
            }

            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }

    /// Release a slot (called when a request resolves).
    #[inline]
    pub fn release(&self) {
        self.pending.fetch_sub(1, Ordering::Release);
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl Clone for BackpressureController {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            max_pending: self.max_pending,
            timeout: self.timeout,
        }
    }
}

/// Guard that automatically releases a backpressure slot on drop.
///
/// Held by a request from admission until its completion resolves, so a
/// request that never reaches the drain loop still gives its slot back.
pub struct BackpressureGuard {
    controller: BackpressureController,
    released: bool,
}

impl BackpressureGuard {
    /// Create a guard that will release on drop.
    pub fn new(controller: BackpressureController) -> Self {
        Self {
            controller,
            released: false,
        }
    }

    /// Manually release the slot.
    pub fn release(mut self) {
        if !self.released {
            self.controller.release();
            self.released = true;
        }
    }
}

impl Drop for BackpressureGuard {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release();
        }
    }
}
